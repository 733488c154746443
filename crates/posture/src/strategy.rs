//! Issue-driven selection of remediation strategies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::evaluator::{Issue, IssueType};

/// CPU utilization target handed to scale-up actions.
pub const DEFAULT_CPU_TARGET_PCT: f64 = 70.0;
/// Memory utilization target handed to scale-up actions.
pub const DEFAULT_MEMORY_TARGET_PCT: f64 = 75.0;
/// CPU ceiling handed to adjust-limits actions.
pub const DEFAULT_CPU_LIMIT_PCT: f64 = 85.0;
/// Memory ceiling handed to adjust-limits actions.
pub const DEFAULT_MEMORY_LIMIT_PCT: f64 = 85.0;
/// Disk ceiling handed to adjust-limits actions.
pub const DEFAULT_DISK_LIMIT_PCT: f64 = 90.0;
/// Placement value that lets the backend choose the region or zone.
pub const AUTO_PLACEMENT: &str = "auto";
/// Component patched by security hardening.
pub const PATCH_COMPONENT: &str = "runtime";
/// Encryption level requested by security hardening, on the 1-5 scale.
pub const TARGET_ENCRYPTION_LEVEL: u8 = 5;

/// Families of remediation the selector can propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Scaling,
    ResourceAllocation,
    Placement,
    Configuration,
    SecurityHardening,
}

impl StrategyKind {
    /// All strategy kinds in emission order.
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Scaling,
        StrategyKind::ResourceAllocation,
        StrategyKind::Placement,
        StrategyKind::Configuration,
        StrategyKind::SecurityHardening,
    ];

    /// Issue types that cause this strategy to be emitted. An issue type may
    /// trigger more than one strategy.
    pub fn trigger_types(&self) -> &'static [IssueType] {
        match self {
            StrategyKind::Scaling => &[
                IssueType::CpuUsage,
                IssueType::MemoryUsage,
                IssueType::Throughput,
                IssueType::Concurrency,
            ],
            StrategyKind::ResourceAllocation => &[
                IssueType::CpuUsage,
                IssueType::MemoryUsage,
                IssueType::DiskUsage,
            ],
            StrategyKind::Placement => &[IssueType::NetworkLatency, IssueType::ResponseTime],
            StrategyKind::Configuration => &[
                IssueType::ErrorRate,
                IssueType::ProcessingTime,
                IssueType::QueueDepth,
            ],
            StrategyKind::SecurityHardening => &[
                IssueType::Vulnerabilities,
                IssueType::PatchLevel,
                IssueType::AuthFailures,
                IssueType::EncryptionLevel,
                IssueType::PolicyViolations,
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Scaling => "scaling",
            StrategyKind::ResourceAllocation => "resource_allocation",
            StrategyKind::Placement => "placement",
            StrategyKind::Configuration => "configuration",
            StrategyKind::SecurityHardening => "security_hardening",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed remediation action with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemediationAction {
    ScaleUp {
        cpu_target_pct: f64,
        memory_target_pct: f64,
    },
    AdjustLimits {
        cpu_limit_pct: f64,
        memory_limit_pct: f64,
        disk_limit_pct: f64,
    },
    Relocate {
        target_region: String,
        target_zone: String,
    },
    TuneParameters {
        parameters: HashMap<String, Value>,
    },
    Patch {
        component: String,
    },
    Encrypt {
        target_level: u8,
    },
}

/// Parameter-free discriminant of a [`RemediationAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ScaleUp,
    AdjustLimits,
    Relocate,
    TuneParameters,
    Patch,
    Encrypt,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ScaleUp => "scale_up",
            ActionKind::AdjustLimits => "adjust_limits",
            ActionKind::Relocate => "relocate",
            ActionKind::TuneParameters => "tune_parameters",
            ActionKind::Patch => "patch",
            ActionKind::Encrypt => "encrypt",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RemediationAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            RemediationAction::ScaleUp { .. } => ActionKind::ScaleUp,
            RemediationAction::AdjustLimits { .. } => ActionKind::AdjustLimits,
            RemediationAction::Relocate { .. } => ActionKind::Relocate,
            RemediationAction::TuneParameters { .. } => ActionKind::TuneParameters,
            RemediationAction::Patch { .. } => ActionKind::Patch,
            RemediationAction::Encrypt { .. } => ActionKind::Encrypt,
        }
    }
}

/// A strategy proposal: the issues it addresses and the actions to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    pub kind: StrategyKind,
    /// Matched issues, most severe first
    pub issues: Vec<Issue>,
    /// Actions in execution order
    pub actions: Vec<RemediationAction>,
}

/// Maps detected issues onto remediation strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategySelector;

impl StrategySelector {
    pub fn new() -> Self {
        Self
    }

    /// Selects strategies for the given issues.
    ///
    /// Issues are stably sorted by severity before matching, so each
    /// emitted strategy lists its most severe issues first. Strategies come
    /// out in the fixed [`StrategyKind::ALL`] order; a strategy is emitted
    /// only when at least one of its trigger issue types is present.
    pub fn select(&self, issues: &[Issue]) -> Vec<OptimizationStrategy> {
        let mut sorted = issues.to_vec();
        sorted.sort_by_key(|issue| issue.severity);

        StrategyKind::ALL
            .iter()
            .filter_map(|kind| {
                let matched: Vec<Issue> = sorted
                    .iter()
                    .filter(|issue| kind.trigger_types().contains(&issue.issue_type))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                let actions = build_actions(*kind, &matched);
                debug!(
                    strategy = %kind,
                    issues = matched.len(),
                    actions = actions.len(),
                    "Strategy selected"
                );
                Some(OptimizationStrategy {
                    kind: *kind,
                    issues: matched,
                    actions,
                })
            })
            .collect()
    }
}

fn build_actions(kind: StrategyKind, issues: &[Issue]) -> Vec<RemediationAction> {
    match kind {
        StrategyKind::Scaling => vec![RemediationAction::ScaleUp {
            cpu_target_pct: DEFAULT_CPU_TARGET_PCT,
            memory_target_pct: DEFAULT_MEMORY_TARGET_PCT,
        }],
        StrategyKind::ResourceAllocation => vec![RemediationAction::AdjustLimits {
            cpu_limit_pct: DEFAULT_CPU_LIMIT_PCT,
            memory_limit_pct: DEFAULT_MEMORY_LIMIT_PCT,
            disk_limit_pct: DEFAULT_DISK_LIMIT_PCT,
        }],
        StrategyKind::Placement => vec![RemediationAction::Relocate {
            target_region: AUTO_PLACEMENT.to_string(),
            target_zone: AUTO_PLACEMENT.to_string(),
        }],
        StrategyKind::Configuration => {
            let mut parameters = HashMap::new();
            for issue in issues {
                match issue.issue_type {
                    IssueType::ErrorRate => {
                        parameters.insert("error_handling".to_string(), Value::from("strict"));
                    }
                    IssueType::ProcessingTime => {
                        parameters.insert("batch_size".to_string(), Value::from(32));
                    }
                    IssueType::QueueDepth => {
                        parameters.insert("queue_limit".to_string(), Value::from(64));
                    }
                    _ => {}
                }
            }
            vec![RemediationAction::TuneParameters { parameters }]
        }
        StrategyKind::SecurityHardening => vec![
            RemediationAction::Patch {
                component: PATCH_COMPONENT.to_string(),
            },
            RemediationAction::Encrypt {
                target_level: TARGET_ENCRYPTION_LEVEL,
            },
        ],
    }
}
