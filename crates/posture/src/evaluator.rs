//! Posture evaluation across four scored dimensions.
//!
//! The evaluator pulls health, performance, security and compliance metric
//! groups from a [`TelemetrySource`], normalizes each metric into a sub-score
//! in `[0, 100]`, and folds the sub-scores into per-dimension reports plus a
//! single weighted `posture_score`. Evaluation never hard-fails: a telemetry
//! outage degrades the affected dimension and attaches the error to the
//! snapshot instead.

use std::sync::Arc;

use capsulecore_core::{ExternalServiceError, RetryPolicy, ServiceKind};
use capsulecore_core::time::unix_timestamp_ms;
use capsulecore_registry::Capsule;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::telemetry::{
    ComplianceMetrics, HealthMetrics, PerformanceMetrics, SecurityMetrics, TelemetrySource,
};
use crate::thresholds::{IssueBars, ScoringThresholds};

/// Issue severity. Variants are declared most severe first so an ascending
/// sort places `High` issues at the front.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// The metric (or outage condition) an issue refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    NetworkLatency,
    ErrorRate,
    ResponseTime,
    Throughput,
    Concurrency,
    QueueDepth,
    ProcessingTime,
    Vulnerabilities,
    PatchLevel,
    AuthFailures,
    EncryptionLevel,
    PolicyViolations,
    ComplianceScore,
    AuditReadiness,
    TelemetryUnavailable,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::CpuUsage => "cpu_usage",
            IssueType::MemoryUsage => "memory_usage",
            IssueType::DiskUsage => "disk_usage",
            IssueType::NetworkLatency => "network_latency",
            IssueType::ErrorRate => "error_rate",
            IssueType::ResponseTime => "response_time",
            IssueType::Throughput => "throughput",
            IssueType::Concurrency => "concurrency",
            IssueType::QueueDepth => "queue_depth",
            IssueType::ProcessingTime => "processing_time",
            IssueType::Vulnerabilities => "vulnerabilities",
            IssueType::PatchLevel => "patch_level",
            IssueType::AuthFailures => "auth_failures",
            IssueType::EncryptionLevel => "encryption_level",
            IssueType::PolicyViolations => "policy_violations",
            IssueType::ComplianceScore => "compliance_score",
            IssueType::AuditReadiness => "audit_readiness",
            IssueType::TelemetryUnavailable => "telemetry_unavailable",
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single problem detected during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub message: String,
}

/// One normalized metric score within a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub metric: IssueType,
    pub score: f64,
}

/// Health dimension tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

/// Performance dimension tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Optimal,
    Acceptable,
    Suboptimal,
}

/// Security dimension tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityStatus {
    Secure,
    Moderate,
    Vulnerable,
}

/// Compliance dimension tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    PartiallyCompliant,
    NonCompliant,
}

/// Maps a dimension score onto that dimension's three-tier status enum.
trait StatusTier: Sized + Copy {
    const BEST: Self;
    const MIDDLE: Self;
    const WORST: Self;

    fn from_score(score: f64, thresholds: &ScoringThresholds) -> Self {
        if score >= thresholds.tier_best {
            Self::BEST
        } else if score >= thresholds.tier_middle {
            Self::MIDDLE
        } else {
            Self::WORST
        }
    }
}

impl StatusTier for HealthStatus {
    const BEST: Self = HealthStatus::Healthy;
    const MIDDLE: Self = HealthStatus::Warning;
    const WORST: Self = HealthStatus::Unhealthy;
}

impl StatusTier for PerformanceStatus {
    const BEST: Self = PerformanceStatus::Optimal;
    const MIDDLE: Self = PerformanceStatus::Acceptable;
    const WORST: Self = PerformanceStatus::Suboptimal;
}

impl StatusTier for SecurityStatus {
    const BEST: Self = SecurityStatus::Secure;
    const MIDDLE: Self = SecurityStatus::Moderate;
    const WORST: Self = SecurityStatus::Vulnerable;
}

impl StatusTier for ComplianceStatus {
    const BEST: Self = ComplianceStatus::Compliant;
    const MIDDLE: Self = ComplianceStatus::PartiallyCompliant;
    const WORST: Self = ComplianceStatus::NonCompliant;
}

/// Scored report for one posture dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionReport<S> {
    /// Mean of the sub-scores, in `[0, 100]`
    pub score: f64,
    /// Tier derived from `score`
    pub status: S,
    /// Normalized per-metric scores, in fixed metric order
    pub sub_scores: Vec<SubScore>,
    /// Issues emitted for sub-scores under the configured bars
    pub issues: Vec<Issue>,
}

/// Point-in-time posture of one capsule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureSnapshot {
    pub capsule_id: String,
    pub evaluated_at_ms: u64,
    pub health: DimensionReport<HealthStatus>,
    pub performance: DimensionReport<PerformanceStatus>,
    pub security: DimensionReport<SecurityStatus>,
    pub compliance: DimensionReport<ComplianceStatus>,
    /// Equal-weighted mean of the four dimension scores
    pub posture_score: f64,
    /// Collaborator failures attached to this snapshot; the evaluator adds
    /// telemetry outages, the orchestrator adds analytics delivery failures
    #[serde(default)]
    pub external_errors: Vec<ExternalServiceError>,
}

impl PostureSnapshot {
    /// All issues across the four dimensions, in health, performance,
    /// security, compliance order.
    pub fn all_issues(&self) -> Vec<Issue> {
        let mut issues = Vec::new();
        issues.extend(self.health.issues.iter().cloned());
        issues.extend(self.performance.issues.iter().cloned());
        issues.extend(self.security.issues.iter().cloned());
        issues.extend(self.compliance.issues.iter().cloned());
        issues
    }

    /// Whether any dimension degraded due to a telemetry outage.
    pub fn is_degraded(&self) -> bool {
        self.external_errors
            .iter()
            .any(|error| error.service == ServiceKind::Telemetry)
    }
}

/// Scores capsule posture from live telemetry.
pub struct PostureEvaluator {
    telemetry: Arc<dyn TelemetrySource>,
    thresholds: ScoringThresholds,
    retry: RetryPolicy,
}

impl PostureEvaluator {
    pub fn new(telemetry: Arc<dyn TelemetrySource>) -> Self {
        Self {
            telemetry,
            thresholds: ScoringThresholds::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ScoringThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn thresholds(&self) -> &ScoringThresholds {
        &self.thresholds
    }

    /// Evaluates the capsule's current posture.
    ///
    /// Telemetry fetches go through the retry policy; a group that stays
    /// unavailable degrades its dimension to score 0, the worst tier and a
    /// single high-severity [`IssueType::TelemetryUnavailable`] issue.
    pub fn evaluate(&self, capsule: &Capsule) -> PostureSnapshot {
        let mut external_errors = Vec::new();

        let health = match self
            .retry
            .run(ServiceKind::Telemetry, || self.telemetry.health(&capsule.id))
        {
            Ok(metrics) => self.score_health(&metrics),
            Err(error) => self.degrade(capsule, "health", error, &mut external_errors),
        };
        let performance = match self.retry.run(ServiceKind::Telemetry, || {
            self.telemetry.performance(&capsule.id)
        }) {
            Ok(metrics) => self.score_performance(&metrics),
            Err(error) => self.degrade(capsule, "performance", error, &mut external_errors),
        };
        let security = match self.retry.run(ServiceKind::Telemetry, || {
            self.telemetry.security(&capsule.id)
        }) {
            Ok(metrics) => self.score_security(&metrics),
            Err(error) => self.degrade(capsule, "security", error, &mut external_errors),
        };
        let compliance = match self.retry.run(ServiceKind::Telemetry, || {
            self.telemetry.compliance(&capsule.id)
        }) {
            Ok(metrics) => self.score_compliance(&metrics),
            Err(error) => self.degrade(capsule, "compliance", error, &mut external_errors),
        };

        let posture_score =
            (health.score + performance.score + security.score + compliance.score) / 4.0;
        debug!(
            capsule_id = %capsule.id,
            posture_score,
            issues = health.issues.len()
                + performance.issues.len()
                + security.issues.len()
                + compliance.issues.len(),
            "Posture evaluated"
        );

        PostureSnapshot {
            capsule_id: capsule.id.clone(),
            evaluated_at_ms: unix_timestamp_ms(),
            health,
            performance,
            security,
            compliance,
            posture_score,
            external_errors,
        }
    }

    fn score_health(&self, metrics: &HealthMetrics) -> DimensionReport<HealthStatus> {
        let sub_scores = vec![
            SubScore {
                metric: IssueType::CpuUsage,
                score: clamp_score(100.0 - metrics.cpu_usage_pct),
            },
            SubScore {
                metric: IssueType::MemoryUsage,
                score: clamp_score(100.0 - metrics.memory_usage_pct),
            },
            SubScore {
                metric: IssueType::DiskUsage,
                score: clamp_score(100.0 - metrics.disk_usage_pct),
            },
            SubScore {
                metric: IssueType::NetworkLatency,
                score: clamp_score(100.0 - metrics.network_latency_ms / 10.0),
            },
            SubScore {
                metric: IssueType::ErrorRate,
                score: clamp_score(100.0 - metrics.error_rate_pct * 10.0),
            },
            SubScore {
                metric: IssueType::ResponseTime,
                score: clamp_score(100.0 - metrics.response_time_ms / 10.0),
            },
        ];
        self.finish_dimension(sub_scores, self.thresholds.operational_issues)
    }

    fn score_performance(
        &self,
        metrics: &PerformanceMetrics,
    ) -> DimensionReport<PerformanceStatus> {
        let baselines = &self.thresholds.performance;
        let sub_scores = vec![
            SubScore {
                metric: IssueType::Throughput,
                score: target_score(metrics.throughput, baselines.throughput),
            },
            SubScore {
                metric: IssueType::Concurrency,
                score: target_score(metrics.concurrency, baselines.concurrency),
            },
            SubScore {
                metric: IssueType::QueueDepth,
                score: ceiling_score(metrics.queue_depth, baselines.queue_depth),
            },
            SubScore {
                metric: IssueType::ProcessingTime,
                score: ceiling_score(metrics.processing_time_ms, baselines.processing_time_ms),
            },
        ];
        self.finish_dimension(sub_scores, self.thresholds.operational_issues)
    }

    fn score_security(&self, metrics: &SecurityMetrics) -> DimensionReport<SecurityStatus> {
        let sub_scores = vec![
            SubScore {
                metric: IssueType::Vulnerabilities,
                score: clamp_score(100.0 - f64::from(metrics.vulnerability_count) * 20.0),
            },
            SubScore {
                metric: IssueType::PatchLevel,
                score: clamp_score(metrics.patch_level_pct),
            },
            SubScore {
                metric: IssueType::AuthFailures,
                score: clamp_score(100.0 - f64::from(metrics.auth_failure_count) * 10.0),
            },
            SubScore {
                metric: IssueType::EncryptionLevel,
                score: clamp_score(f64::from(metrics.encryption_level) / 5.0 * 100.0),
            },
        ];
        self.finish_dimension(sub_scores, self.thresholds.strict_issues)
    }

    fn score_compliance(&self, metrics: &ComplianceMetrics) -> DimensionReport<ComplianceStatus> {
        let sub_scores = vec![
            SubScore {
                metric: IssueType::PolicyViolations,
                score: clamp_score(100.0 - f64::from(metrics.policy_violation_count) * 20.0),
            },
            SubScore {
                metric: IssueType::ComplianceScore,
                score: clamp_score(metrics.compliance_score_pct),
            },
            SubScore {
                metric: IssueType::AuditReadiness,
                score: clamp_score(metrics.audit_readiness_pct),
            },
        ];
        self.finish_dimension(sub_scores, self.thresholds.strict_issues)
    }

    fn finish_dimension<S: StatusTier>(
        &self,
        sub_scores: Vec<SubScore>,
        bars: IssueBars,
    ) -> DimensionReport<S> {
        let score = mean(&sub_scores);
        let issues = emit_issues(&sub_scores, bars);
        DimensionReport {
            score,
            status: S::from_score(score, &self.thresholds),
            sub_scores,
            issues,
        }
    }

    fn degrade<S: StatusTier>(
        &self,
        capsule: &Capsule,
        group: &'static str,
        error: ExternalServiceError,
        external_errors: &mut Vec<ExternalServiceError>,
    ) -> DimensionReport<S> {
        warn!(
            capsule_id = %capsule.id,
            group,
            error = %error,
            "Telemetry fetch failed, dimension degraded"
        );
        let issue = Issue {
            issue_type: IssueType::TelemetryUnavailable,
            severity: Severity::High,
            message: format!("{group} metrics unavailable: {}", error.reason),
        };
        external_errors.push(error);
        DimensionReport {
            score: 0.0,
            status: S::WORST,
            sub_scores: Vec::new(),
            issues: vec![issue],
        }
    }
}

/// Clamps into `[0, 100]`. Non-finite inputs score 0.
fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Attainment of a target baseline as a score. Non-positive targets
/// cannot be attained and score 0.
fn target_score(value: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    clamp_score(value / target * 100.0)
}

/// Headroom left under a ceiling baseline as a score. Non-positive
/// ceilings leave no headroom and score 0.
fn ceiling_score(value: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        return 0.0;
    }
    clamp_score(100.0 - value / ceiling * 100.0)
}

fn mean(sub_scores: &[SubScore]) -> f64 {
    if sub_scores.is_empty() {
        return 0.0;
    }
    sub_scores.iter().map(|sub| sub.score).sum::<f64>() / sub_scores.len() as f64
}

fn emit_issues(sub_scores: &[SubScore], bars: IssueBars) -> Vec<Issue> {
    sub_scores
        .iter()
        .filter(|sub| sub.score < bars.emit_below)
        .map(|sub| {
            let severity = if sub.score < bars.high_below {
                Severity::High
            } else {
                Severity::Medium
            };
            Issue {
                issue_type: sub.metric,
                severity,
                message: format!(
                    "{} sub-score {:.1} below threshold {:.0}",
                    sub.metric, sub.score, bars.emit_below
                ),
            }
        })
        .collect()
}
