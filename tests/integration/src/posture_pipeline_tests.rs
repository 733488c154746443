//! Posture Pipeline - Telemetry to Remediation Scenarios
//!
//! This test suite drives the full posture loop over a SQLite-backed
//! registry: telemetry intake, scoring, strategy selection and action
//! dispatch against the infrastructure backend.
//!
//! # Test Scenarios
//!
//! 1. **Degraded Capsule Scoring**: Overload telemetry surfaces issues in
//!    all four dimensions with worst-tier statuses
//! 2. **Action Dispatch**: Optimization maps issues onto strategies and
//!    dispatches one request per planned action, in declaration order
//! 3. **Strategy Filtering**: A kind allowlist restricts what executes
//! 4. **Monitoring Intents**: Registration hands back a schedule without
//!    touching infrastructure; cancellation revokes it
//! 5. **Fleet Sweep**: `analyze_all` honors registry filters
//! 6. **Telemetry Outage**: Missing metrics degrade scores to zero instead
//!    of failing the call
//! 7. **Wire Format**: Snapshots and optimization reports serialize to the
//!    JSON shape downstream consumers read, and parse back unchanged
//!
//! # Expected Outcomes
//!
//! - Posture scores are the equal-weighted mean of the dimension scores
//! - Every dispatched request carries a unique action id
//! - Collaborator failures ride back in the response envelope
//! - Analytics receives posture events alongside registry events
//! - Serialized payloads keep snake_case statuses and tagged action objects

use crate::test_utils::{degraded_telemetry, healthy_telemetry, TestSystem};
use capsulecore_core::event::event_types;
use capsulecore_posture::{
    ActionKind, ComplianceStatus, HealthStatus, IssueType, MonitorRequest, OptimizationReport,
    PerformanceStatus, PostureError, RemediationAction, SecurityStatus, Severity, StrategyKind,
};
use capsulecore_registry::{CapsuleDraft, CapsuleFilter, CapsuleType};
use serde::Deserialize;
use std::collections::HashMap;

#[test]
fn test_degraded_capsule_scores_every_dimension() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    system.telemetry.set("app-1", degraded_telemetry());

    let snapshot = system.orchestrator.analyze("app-1").unwrap();

    assert!((snapshot.health.score - 21.0).abs() < 1e-9);
    assert_eq!(snapshot.health.status, HealthStatus::Unhealthy);
    assert_eq!(snapshot.health.issues.len(), 6);

    assert!((snapshot.performance.score - 7.5).abs() < 1e-9);
    assert_eq!(snapshot.performance.status, PerformanceStatus::Suboptimal);
    assert_eq!(snapshot.performance.issues.len(), 4);

    assert!((snapshot.security.score - 41.25).abs() < 1e-9);
    assert_eq!(snapshot.security.status, SecurityStatus::Vulnerable);
    assert_eq!(snapshot.security.issues.len(), 4);

    assert!((snapshot.compliance.score - 163.0 / 3.0).abs() < 1e-9);
    assert_eq!(snapshot.compliance.status, ComplianceStatus::NonCompliant);
    assert_eq!(snapshot.compliance.issues.len(), 3);

    let expected = (21.0 + 7.5 + 41.25 + 163.0 / 3.0) / 4.0;
    assert!((snapshot.posture_score - expected).abs() < 1e-9);
    assert!(snapshot.external_errors.is_empty());
    assert!(!snapshot.is_degraded());
}

#[test]
fn test_healthy_capsule_scores_full_marks() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    system.telemetry.set("app-1", healthy_telemetry());

    let snapshot = system.orchestrator.analyze("app-1").unwrap();
    assert_eq!(snapshot.posture_score, 100.0);
    assert!(snapshot.all_issues().is_empty());
    assert_eq!(snapshot.health.status, HealthStatus::Healthy);
    assert_eq!(snapshot.compliance.status, ComplianceStatus::Compliant);

    assert_eq!(
        system.event_types(),
        [event_types::CAPSULE_REGISTERED, event_types::POSTURE_ANALYZED]
    );
}

#[test]
fn test_optimize_dispatches_mapped_actions() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    system.telemetry.set("app-1", degraded_telemetry());

    let report = system.orchestrator.optimize("app-1", None).unwrap();

    // Overload telemetry trips every strategy family, in declaration order.
    let strategies: Vec<StrategyKind> = report
        .execution
        .executions
        .iter()
        .map(|execution| execution.strategy)
        .collect();
    assert_eq!(strategies, StrategyKind::ALL);
    assert_eq!(report.execution.applied_count, 6);
    assert_eq!(report.execution.failed_count, 0);
    assert!(report.execution.is_fully_applied());

    let requests = system.backend.requests();
    let kinds: Vec<ActionKind> = requests.iter().map(|request| request.action.kind()).collect();
    assert_eq!(
        kinds,
        [
            ActionKind::ScaleUp,
            ActionKind::AdjustLimits,
            ActionKind::Relocate,
            ActionKind::TuneParameters,
            ActionKind::Patch,
            ActionKind::Encrypt
        ]
    );
    assert!(requests.iter().all(|request| request.capsule_id == "app-1"));
    let mut action_ids: Vec<&str> = requests
        .iter()
        .map(|request| request.action_id.as_str())
        .collect();
    action_ids.sort_unstable();
    action_ids.dedup();
    assert_eq!(action_ids.len(), requests.len());

    // Error rate, queue depth and processing time all degraded, so the
    // tuning action carries all three parameters.
    let tune = requests
        .iter()
        .find(|request| request.action.kind() == ActionKind::TuneParameters)
        .unwrap();
    match &tune.action {
        RemediationAction::TuneParameters { parameters } => {
            assert_eq!(parameters.len(), 3);
            assert!(parameters.contains_key("error_handling"));
            assert!(parameters.contains_key("batch_size"));
            assert!(parameters.contains_key("queue_limit"));
        }
        other => panic!("unexpected action: {other:?}"),
    }

    assert!(report.analytics_error.is_none());
    assert_eq!(
        system.event_types().last().map(String::as_str),
        Some(event_types::POSTURE_OPTIMIZED)
    );
}

#[test]
fn test_optimize_honors_strategy_allowlist() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    system.telemetry.set("app-1", degraded_telemetry());

    let report = system
        .orchestrator
        .optimize("app-1", Some(&[StrategyKind::SecurityHardening]))
        .unwrap();

    assert_eq!(report.execution.executions.len(), 1);
    assert_eq!(
        report.execution.executions[0].strategy,
        StrategyKind::SecurityHardening
    );
    let kinds: Vec<ActionKind> = system
        .backend
        .requests()
        .iter()
        .map(|request| request.action.kind())
        .collect();
    assert_eq!(kinds, [ActionKind::Patch, ActionKind::Encrypt]);
}

#[test]
fn test_monitor_registers_intent_without_dispatch() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    system.telemetry.set("app-1", healthy_telemetry());

    let handle = system
        .orchestrator
        .monitor("app-1", MonitorRequest::default())
        .unwrap();
    assert_eq!(handle.capsule_id, "app-1");
    assert_eq!(
        handle.expires_at_ms,
        handle.registered_at_ms + 3_600_000
    );
    assert_eq!(system.orchestrator.active_monitors().len(), 1);
    // Monitoring is an intent for an external scheduler; nothing executes.
    assert!(system.backend.requests().is_empty());

    let cancelled = system.orchestrator.cancel_monitor(&handle.monitor_id);
    assert_eq!(cancelled.map(|handle| handle.capsule_id), Some("app-1".to_string()));
    assert!(system.orchestrator.active_monitors().is_empty());
    assert!(system.orchestrator.cancel_monitor(&handle.monitor_id).is_none());

    let types = system.event_types();
    assert!(types.contains(&event_types::MONITOR_REGISTERED.to_string()));
    assert!(types.contains(&event_types::MONITOR_CANCELLED.to_string()));

    let metrics = system.orchestrator.metrics();
    assert_eq!(metrics.monitors_registered_total, 1);
    assert_eq!(metrics.monitors_cancelled_total, 1);
}

#[test]
fn test_fleet_sweep_honors_type_filter() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    system.register_capsule("app-2");
    system
        .registry
        .register(CapsuleDraft::new("dataset", CapsuleType::Data).with_id("data-1"))
        .unwrap();
    system.telemetry.set("app-1", healthy_telemetry());
    system.telemetry.set("app-2", degraded_telemetry());
    system.telemetry.set("data-1", healthy_telemetry());

    let snapshots = system
        .orchestrator
        .analyze_all(&CapsuleFilter::new().with_type(CapsuleType::Application))
        .unwrap();

    let scores: HashMap<&str, f64> = snapshots
        .iter()
        .map(|snapshot| (snapshot.capsule_id.as_str(), snapshot.posture_score))
        .collect();
    assert_eq!(scores.len(), 2);
    assert_eq!(scores["app-1"], 100.0);
    assert!(scores["app-2"] < 60.0);
    assert!(!scores.contains_key("data-1"));
    assert_eq!(system.orchestrator.metrics().analyses_total, 2);
}

#[test]
fn test_unknown_capsule_is_reported() {
    let system = TestSystem::create();
    let error = system.orchestrator.analyze("ghost").unwrap_err();
    assert!(matches!(error, PostureError::CapsuleNotFound { ref id } if id == "ghost"));
    let error = system.orchestrator.optimize("ghost", None).unwrap_err();
    assert!(matches!(error, PostureError::CapsuleNotFound { .. }));
}

#[test]
fn test_telemetry_outage_rides_back_in_envelope() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    // No telemetry document installed: every metric group lookup fails.

    let snapshot = system.orchestrator.analyze("app-1").unwrap();
    assert_eq!(snapshot.posture_score, 0.0);
    assert!(snapshot.is_degraded());
    assert_eq!(snapshot.external_errors.len(), 4);
    assert_eq!(snapshot.health.status, HealthStatus::Unhealthy);
    assert_eq!(snapshot.security.status, SecurityStatus::Vulnerable);
    for issue in snapshot.all_issues() {
        assert_eq!(issue.issue_type, IssueType::TelemetryUnavailable);
        assert_eq!(issue.severity, Severity::High);
    }
}

/// Subset of snapshot fields external dashboards key on.
#[derive(Debug, Deserialize)]
struct SnapshotSummary {
    capsule_id: String,
    posture_score: f64,
}

#[test]
fn test_posture_payloads_keep_their_wire_shape() {
    let system = TestSystem::create();
    system.register_capsule("app-1");
    system.telemetry.set("app-1", degraded_telemetry());

    let snapshot = system.orchestrator.analyze("app-1").unwrap();
    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["capsule_id"], "app-1");
    assert_eq!(value["health"]["status"], "unhealthy");
    assert_eq!(value["security"]["status"], "vulnerable");
    assert_eq!(value["health"]["issues"][0]["issue_type"], "cpu_usage");
    assert_eq!(value["health"]["issues"][0]["severity"], "high");

    let summary: SnapshotSummary = serde_json::from_value(value).unwrap();
    assert_eq!(summary.capsule_id, "app-1");
    assert!((summary.posture_score - snapshot.posture_score).abs() < 1e-9);

    let report = system.orchestrator.optimize("app-1", None).unwrap();
    let text = serde_json::to_string(&report).unwrap();
    // Remediation actions serialize under an internal "type" tag.
    assert!(text.contains(r#""type":"scale_up""#));
    let restored: OptimizationReport = serde_json::from_str(&text).unwrap();
    assert_eq!(restored, report);
}
