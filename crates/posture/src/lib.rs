//! Posture evaluation and remediation for the CapsuleCore system.
//!
//! This crate scores capsule posture from telemetry, maps detected issues
//! onto remediation strategies, dispatches the resulting actions to an
//! infrastructure backend, and coordinates the whole analyze / optimize /
//! monitor workflow against the capsule registry.

pub mod error;
pub mod evaluator;
pub mod executor;
pub mod orchestrator;
pub mod strategy;
pub mod telemetry;
pub mod thresholds;

pub use error::{PostureError, PostureResult};
pub use evaluator::{
    ComplianceStatus, DimensionReport, HealthStatus, Issue, IssueType, PerformanceStatus,
    PostureEvaluator, PostureSnapshot, SecurityStatus, Severity, SubScore,
};
pub use executor::{
    ActionExecutor, ActionOutcome, ActionRequest, ActionStatus, ApplyOutcome, ApplyStatus,
    DryRunBackend, ExecutionReport, InfraBackend, StrategyExecution,
};
pub use orchestrator::{
    MonitorRequest, MonitoringHandle, OptimizationReport, PostureMetricsSnapshot,
    PostureOrchestrator,
};
pub use strategy::{
    ActionKind, OptimizationStrategy, RemediationAction, StrategyKind, StrategySelector,
};
pub use telemetry::{
    ComplianceMetrics, FsTelemetrySource, HealthMetrics, MemoryTelemetrySource,
    PerformanceMetrics, SecurityMetrics, TelemetryDocument, TelemetrySource,
};
pub use thresholds::{IssueBars, PerformanceBaselines, ScoringThresholds};
