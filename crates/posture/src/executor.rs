//! Dispatches remediation actions to an infrastructure backend.

use std::sync::Arc;

use capsulecore_core::time::unix_timestamp_ms;
use capsulecore_core::{ExternalServiceError, RetryPolicy, ServiceError, ServiceKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::strategy::{OptimizationStrategy, RemediationAction, StrategyKind};

/// One action dispatch handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Client-generated id so backends can deduplicate retried calls
    pub action_id: String,
    pub capsule_id: String,
    pub action: RemediationAction,
}

/// Backend verdict for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Applied,
    Rejected,
}

/// Backend response to an [`ActionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    pub message: String,
}

impl ApplyOutcome {
    pub fn applied(message: impl Into<String>) -> Self {
        Self {
            status: ApplyStatus::Applied,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: ApplyStatus::Rejected,
            message: message.into(),
        }
    }
}

/// Infrastructure collaborator that carries out remediation actions.
///
/// `Err` signals a transport-level failure and is retried under the
/// executor's retry policy; a `Rejected` outcome (an unsupported action,
/// for instance) is definitive and is not retried.
pub trait InfraBackend: Send + Sync {
    fn apply(&self, request: &ActionRequest) -> Result<ApplyOutcome, ServiceError>;
}

/// Backend that acknowledges every action without touching infrastructure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunBackend;

impl DryRunBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InfraBackend for DryRunBackend {
    fn apply(&self, request: &ActionRequest) -> Result<ApplyOutcome, ServiceError> {
        info!(
            capsule_id = %request.capsule_id,
            action_id = %request.action_id,
            action = %request.action.kind(),
            "Dry-run action acknowledged"
        );
        Ok(ApplyOutcome::applied(format!(
            "dry-run: {} acknowledged",
            request.action.kind()
        )))
    }
}

/// Final status of one dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The backend carried the action out
    Applied,
    /// The backend refused the action; retrying would not help
    Rejected,
    /// The backend stayed unreachable through the retry policy
    Failed,
}

/// Result of one action dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub capsule_id: String,
    pub action: RemediationAction,
    pub status: ActionStatus,
    /// Backend message, or the failure reason
    pub message: String,
    pub completed_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_error: Option<ExternalServiceError>,
}

/// Outcomes for all actions of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyExecution {
    pub strategy: StrategyKind,
    pub outcomes: Vec<ActionOutcome>,
}

/// Aggregate result of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub executions: Vec<StrategyExecution>,
    pub applied_count: usize,
    pub failed_count: usize,
}

impl ExecutionReport {
    pub fn new(executions: Vec<StrategyExecution>) -> Self {
        let mut applied_count = 0;
        let mut failed_count = 0;
        for outcome in executions.iter().flat_map(|execution| &execution.outcomes) {
            match outcome.status {
                ActionStatus::Applied => applied_count += 1,
                ActionStatus::Rejected | ActionStatus::Failed => failed_count += 1,
            }
        }
        Self {
            executions,
            applied_count,
            failed_count,
        }
    }

    pub fn is_fully_applied(&self) -> bool {
        self.failed_count == 0
    }

    /// All action outcomes across strategies, in dispatch order.
    pub fn outcomes(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.executions
            .iter()
            .flat_map(|execution| execution.outcomes.iter())
    }
}

/// Applies selected strategies through an [`InfraBackend`].
pub struct ActionExecutor {
    backend: Arc<dyn InfraBackend>,
    retry: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(backend: Arc<dyn InfraBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Applies every action of every strategy, in order.
    ///
    /// A rejected or failed action never stops the remaining actions of the
    /// same or later strategies.
    pub fn execute(
        &self,
        capsule_id: &str,
        strategies: &[OptimizationStrategy],
    ) -> ExecutionReport {
        let executions = strategies
            .iter()
            .map(|strategy| StrategyExecution {
                strategy: strategy.kind,
                outcomes: strategy
                    .actions
                    .iter()
                    .map(|action| self.apply_action(capsule_id, action))
                    .collect(),
            })
            .collect();
        let report = ExecutionReport::new(executions);
        info!(
            capsule_id,
            applied = report.applied_count,
            failed = report.failed_count,
            "Remediation actions dispatched"
        );
        report
    }

    fn apply_action(&self, capsule_id: &str, action: &RemediationAction) -> ActionOutcome {
        let request = ActionRequest {
            action_id: Uuid::new_v4().to_string(),
            capsule_id: capsule_id.to_string(),
            action: action.clone(),
        };
        match self
            .retry
            .run(ServiceKind::Infrastructure, || self.backend.apply(&request))
        {
            Ok(outcome) => {
                let status = match outcome.status {
                    ApplyStatus::Applied => ActionStatus::Applied,
                    ApplyStatus::Rejected => {
                        warn!(
                            capsule_id = %request.capsule_id,
                            action = %request.action.kind(),
                            message = %outcome.message,
                            "Backend rejected action"
                        );
                        ActionStatus::Rejected
                    }
                };
                ActionOutcome {
                    action_id: request.action_id,
                    capsule_id: request.capsule_id,
                    action: request.action,
                    status,
                    message: outcome.message,
                    completed_at_ms: unix_timestamp_ms(),
                    external_error: None,
                }
            }
            Err(error) => {
                warn!(
                    capsule_id = %request.capsule_id,
                    action = %request.action.kind(),
                    error = %error,
                    "Backend unreachable, action failed"
                );
                ActionOutcome {
                    action_id: request.action_id,
                    capsule_id: request.capsule_id,
                    action: request.action,
                    status: ActionStatus::Failed,
                    message: error.to_string(),
                    completed_at_ms: unix_timestamp_ms(),
                    external_error: Some(error),
                }
            }
        }
    }
}
