//! Coordinates registry lookup, evaluation, strategy selection and action
//! execution into the analyze / optimize / monitor workflow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use capsulecore_core::event::{
    event_types, AnalyticsSink, Event, EventBuilder, EventCategory, EventSeverity,
};
use capsulecore_core::time::unix_timestamp_ms;
use capsulecore_core::{ExternalServiceError, RetryPolicy, ServiceKind};
use capsulecore_registry::{Capsule, CapsuleFilter, CapsuleRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PostureError, PostureResult};
use crate::evaluator::{PostureEvaluator, PostureSnapshot};
use crate::executor::{ActionExecutor, ExecutionReport};
use crate::strategy::{StrategyKind, StrategySelector};

/// A request to monitor a capsule's posture.
///
/// Monitoring is an intent handed to an external scheduler; registering one
/// never starts a background loop here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRequest {
    /// How often the scheduler should re-evaluate
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// How long the intent stays active
    #[serde(with = "humantime_serde", default = "default_duration")]
    pub duration: Duration,

    /// Posture score under which the scheduler should alert
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Whether an alerting analysis should be followed by an optimization
    #[serde(default)]
    pub auto_optimize: bool,
}

const fn default_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_duration() -> Duration {
    Duration::from_secs(3600)
}

const fn default_alert_threshold() -> f64 {
    70.0
}

impl Default for MonitorRequest {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            duration: default_duration(),
            alert_threshold: default_alert_threshold(),
            auto_optimize: false,
        }
    }
}

/// A registered monitoring intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringHandle {
    pub monitor_id: String,
    pub capsule_id: String,
    pub request: MonitorRequest,
    pub registered_at_ms: u64,
    /// When the intent lapses unless re-registered
    pub expires_at_ms: u64,
}

/// Result of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub capsule_id: String,
    /// Posture before any action ran
    pub before: PostureSnapshot,
    /// Dispatch results for the selected strategies
    pub execution: ExecutionReport,
    /// Posture re-evaluated after the actions
    pub after: PostureSnapshot,
    pub completed_at_ms: u64,
    /// Analytics delivery failure, if any
    pub analytics_error: Option<ExternalServiceError>,
}

#[derive(Debug, Default)]
pub struct PostureMetrics {
    analyses_total: AtomicU64,
    optimizations_total: AtomicU64,
    actions_applied_total: AtomicU64,
    actions_failed_total: AtomicU64,
    monitors_registered_total: AtomicU64,
    monitors_cancelled_total: AtomicU64,
    analytics_failures_total: AtomicU64,
}

/// Point-in-time copy of the orchestrator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureMetricsSnapshot {
    pub analyses_total: u64,
    pub optimizations_total: u64,
    pub actions_applied_total: u64,
    pub actions_failed_total: u64,
    pub monitors_registered_total: u64,
    pub monitors_cancelled_total: u64,
    pub analytics_failures_total: u64,
}

impl PostureMetrics {
    fn snapshot(&self) -> PostureMetricsSnapshot {
        PostureMetricsSnapshot {
            analyses_total: self.analyses_total.load(Ordering::Relaxed),
            optimizations_total: self.optimizations_total.load(Ordering::Relaxed),
            actions_applied_total: self.actions_applied_total.load(Ordering::Relaxed),
            actions_failed_total: self.actions_failed_total.load(Ordering::Relaxed),
            monitors_registered_total: self.monitors_registered_total.load(Ordering::Relaxed),
            monitors_cancelled_total: self.monitors_cancelled_total.load(Ordering::Relaxed),
            analytics_failures_total: self.analytics_failures_total.load(Ordering::Relaxed),
        }
    }
}

/// The posture workflow coordinator.
///
/// Within one capsule's optimization the evaluate, select, execute,
/// re-evaluate pipeline runs strictly in order; calls for different
/// capsules may run concurrently since the registry hands out snapshots.
pub struct PostureOrchestrator {
    registry: Arc<CapsuleRegistry>,
    evaluator: PostureEvaluator,
    selector: StrategySelector,
    executor: ActionExecutor,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    retry: RetryPolicy,
    monitors: Mutex<HashMap<String, MonitoringHandle>>,
    metrics: PostureMetrics,
}

impl PostureOrchestrator {
    pub fn new(
        registry: Arc<CapsuleRegistry>,
        evaluator: PostureEvaluator,
        executor: ActionExecutor,
    ) -> Self {
        Self {
            registry,
            evaluator,
            selector: StrategySelector::new(),
            executor,
            analytics: None,
            retry: RetryPolicy::default(),
            monitors: Mutex::new(HashMap::new()),
            metrics: PostureMetrics::default(),
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> PostureMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Evaluates the current posture of one capsule.
    pub fn analyze(&self, id: &str) -> PostureResult<PostureSnapshot> {
        let capsule = self.lookup(id)?;
        let mut snapshot = self.evaluator.evaluate(&capsule);
        self.metrics.analyses_total.fetch_add(1, Ordering::Relaxed);
        info!(
            capsule_id = %capsule.id,
            posture_score = snapshot.posture_score,
            "Posture analyzed"
        );

        let event = EventBuilder::new(event_types::POSTURE_ANALYZED, "posture")
            .category(EventCategory::Posture)
            .capsule(capsule.id.as_str())
            .message(format!("Posture of capsule {} analyzed", capsule.name))
            .metadata("posture_score", snapshot.posture_score)
            .metadata("issues", snapshot.all_issues().len())
            .build();
        if let Some(error) = self.track(event) {
            snapshot.external_errors.push(error);
        }
        Ok(snapshot)
    }

    /// Evaluates, remediates and re-evaluates one capsule.
    ///
    /// `kinds` restricts execution to the named strategy families; `None`
    /// runs everything the selector proposes.
    pub fn optimize(
        &self,
        id: &str,
        kinds: Option<&[StrategyKind]>,
    ) -> PostureResult<OptimizationReport> {
        let capsule = self.lookup(id)?;
        let before = self.evaluator.evaluate(&capsule);
        let mut strategies = self.selector.select(&before.all_issues());
        if let Some(kinds) = kinds {
            strategies.retain(|strategy| kinds.contains(&strategy.kind));
        }
        let execution = self.executor.execute(&capsule.id, &strategies);
        let after = self.evaluator.evaluate(&capsule);

        self.metrics
            .optimizations_total
            .fetch_add(1, Ordering::Relaxed);
        self.metrics
            .actions_applied_total
            .fetch_add(execution.applied_count as u64, Ordering::Relaxed);
        self.metrics
            .actions_failed_total
            .fetch_add(execution.failed_count as u64, Ordering::Relaxed);
        info!(
            capsule_id = %capsule.id,
            strategies = strategies.len(),
            applied = execution.applied_count,
            failed = execution.failed_count,
            posture_before = before.posture_score,
            posture_after = after.posture_score,
            "Posture optimization finished"
        );

        let severity = if execution.failed_count > 0 {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };
        let event = EventBuilder::new(event_types::POSTURE_OPTIMIZED, "posture")
            .category(EventCategory::Remediation)
            .severity(severity)
            .capsule(capsule.id.as_str())
            .message(format!("Posture of capsule {} optimized", capsule.name))
            .metadata("strategies", strategies.len())
            .metadata("applied", execution.applied_count)
            .metadata("failed", execution.failed_count)
            .metadata("posture_before", before.posture_score)
            .metadata("posture_after", after.posture_score)
            .build();
        let analytics_error = self.track(event);

        Ok(OptimizationReport {
            capsule_id: capsule.id,
            before,
            execution,
            after,
            completed_at_ms: unix_timestamp_ms(),
            analytics_error,
        })
    }

    /// Registers a monitoring intent for an external scheduler.
    pub fn monitor(&self, id: &str, request: MonitorRequest) -> PostureResult<MonitoringHandle> {
        let capsule = self.lookup(id)?;
        let registered_at_ms = unix_timestamp_ms();
        let expires_at_ms =
            registered_at_ms.saturating_add(request.duration.as_millis() as u64);
        let handle = MonitoringHandle {
            monitor_id: Uuid::new_v4().to_string(),
            capsule_id: capsule.id.clone(),
            request,
            registered_at_ms,
            expires_at_ms,
        };
        self.monitors
            .lock()
            .unwrap()
            .insert(handle.monitor_id.clone(), handle.clone());
        self.metrics
            .monitors_registered_total
            .fetch_add(1, Ordering::Relaxed);
        info!(
            capsule_id = %capsule.id,
            monitor_id = %handle.monitor_id,
            interval = ?handle.request.interval,
            auto_optimize = handle.request.auto_optimize,
            "Monitoring intent registered"
        );

        let event = EventBuilder::new(event_types::MONITOR_REGISTERED, "posture")
            .category(EventCategory::Posture)
            .capsule(capsule.id.as_str())
            .message(format!("Monitoring of capsule {} registered", capsule.name))
            .metadata("monitor_id", handle.monitor_id.as_str())
            .metadata("interval_ms", handle.request.interval.as_millis() as u64)
            .metadata("duration_ms", handle.request.duration.as_millis() as u64)
            .metadata("alert_threshold", handle.request.alert_threshold)
            .metadata("auto_optimize", handle.request.auto_optimize)
            .build();
        self.track(event);
        Ok(handle)
    }

    /// Removes a monitoring intent. Returns the handle if it was present.
    pub fn cancel_monitor(&self, monitor_id: &str) -> Option<MonitoringHandle> {
        let handle = self.monitors.lock().unwrap().remove(monitor_id)?;
        self.metrics
            .monitors_cancelled_total
            .fetch_add(1, Ordering::Relaxed);
        info!(
            capsule_id = %handle.capsule_id,
            monitor_id,
            "Monitoring intent cancelled"
        );

        let event = EventBuilder::new(event_types::MONITOR_CANCELLED, "posture")
            .category(EventCategory::Posture)
            .capsule(handle.capsule_id.as_str())
            .message(format!(
                "Monitoring of capsule {} cancelled",
                handle.capsule_id
            ))
            .metadata("monitor_id", monitor_id)
            .build();
        self.track(event);
        Some(handle)
    }

    /// Monitoring intents that have not lapsed, oldest first. Lapsed
    /// intents are pruned on the way.
    pub fn active_monitors(&self) -> Vec<MonitoringHandle> {
        let now = unix_timestamp_ms();
        let mut monitors = self.monitors.lock().unwrap();
        monitors.retain(|_, handle| handle.expires_at_ms > now);
        let mut active: Vec<MonitoringHandle> = monitors.values().cloned().collect();
        active.sort_by(|a, b| {
            (a.registered_at_ms, &a.monitor_id).cmp(&(b.registered_at_ms, &b.monitor_id))
        });
        active
    }

    /// Evaluates every capsule matching the filter.
    ///
    /// Read-only: no strategies run, no analytics events are emitted per
    /// capsule. Evaluation works off the listing snapshot.
    pub fn analyze_all(&self, filter: &CapsuleFilter) -> PostureResult<Vec<PostureSnapshot>> {
        let capsules = self.registry.list(filter)?;
        let snapshots: Vec<PostureSnapshot> = capsules
            .iter()
            .map(|capsule| self.evaluator.evaluate(capsule))
            .collect();
        self.metrics
            .analyses_total
            .fetch_add(snapshots.len() as u64, Ordering::Relaxed);
        info!(count = snapshots.len(), "Posture sweep finished");
        Ok(snapshots)
    }

    fn lookup(&self, id: &str) -> PostureResult<Capsule> {
        match self.registry.get(id) {
            Ok(capsule) => Ok(capsule),
            Err(RegistryError::NotFound { id }) => Err(PostureError::CapsuleNotFound { id }),
            Err(error) => Err(error.into()),
        }
    }

    fn track(&self, event: Event) -> Option<ExternalServiceError> {
        let sink = match &self.analytics {
            Some(sink) => sink,
            None => return None,
        };
        match self.retry.run(ServiceKind::Analytics, || sink.track(&event)) {
            Ok(()) => None,
            Err(error) => {
                self.metrics
                    .analytics_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_type = %event.event_type,
                    error = %error,
                    "Analytics delivery failed"
                );
                Some(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ActionRequest, ApplyOutcome, InfraBackend};
    use crate::strategy::RemediationAction;
    use crate::telemetry::{MemoryTelemetrySource, TelemetryDocument};
    use capsulecore_core::event::MemoryAnalytics;
    use capsulecore_core::ServiceError;
    use capsulecore_registry::{CapsuleDraft, CapsuleType, MemoryCapsuleStore};

    struct CountingBackend {
        requests: Mutex<Vec<ActionRequest>>,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl InfraBackend for CountingBackend {
        fn apply(&self, request: &ActionRequest) -> Result<ApplyOutcome, ServiceError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ApplyOutcome::applied("ok"))
        }
    }

    struct TestHarness {
        registry: Arc<CapsuleRegistry>,
        telemetry: Arc<MemoryTelemetrySource>,
        backend: Arc<CountingBackend>,
        analytics: Arc<MemoryAnalytics>,
        orchestrator: PostureOrchestrator,
    }

    fn create_test_harness() -> TestHarness {
        let registry = Arc::new(CapsuleRegistry::new(Arc::new(MemoryCapsuleStore::new())));
        let telemetry = Arc::new(MemoryTelemetrySource::new());
        let backend = Arc::new(CountingBackend::new());
        let analytics = Arc::new(MemoryAnalytics::new());
        let evaluator = PostureEvaluator::new(telemetry.clone())
            .with_retry_policy(RetryPolicy::none());
        let executor =
            ActionExecutor::new(backend.clone()).with_retry_policy(RetryPolicy::none());
        let orchestrator = PostureOrchestrator::new(registry.clone(), evaluator, executor)
            .with_analytics(analytics.clone())
            .with_retry_policy(RetryPolicy::none());
        TestHarness {
            registry,
            telemetry,
            backend,
            analytics,
            orchestrator,
        }
    }

    fn register_capsule(harness: &TestHarness, id: &str, capsule_type: CapsuleType) {
        harness
            .registry
            .register(CapsuleDraft::new(format!("{id}-name"), capsule_type).with_id(id))
            .unwrap();
    }

    fn healthy_document() -> TelemetryDocument {
        let mut document = TelemetryDocument::default();
        document.performance.throughput = 200.0;
        document.performance.concurrency = 100.0;
        document.security.patch_level_pct = 100.0;
        document.security.encryption_level = 5;
        document.compliance.compliance_score_pct = 100.0;
        document.compliance.audit_readiness_pct = 100.0;
        document
    }

    fn overloaded_document() -> TelemetryDocument {
        let mut document = healthy_document();
        document.health.cpu_usage_pct = 95.0;
        document
    }

    #[test]
    fn test_analyze_unknown_capsule_fails() {
        let harness = create_test_harness();

        let error = harness.orchestrator.analyze("ghost").unwrap_err();
        match error {
            PostureError::CapsuleNotFound { id } => assert_eq!(id, "ghost"),
            other => panic!("expected CapsuleNotFound, got {other:?}"),
        }
        assert_eq!(harness.orchestrator.metrics().analyses_total, 0);
    }

    #[test]
    fn test_analyze_scores_and_tracks_event() {
        let harness = create_test_harness();
        register_capsule(&harness, "cap-1", CapsuleType::Application);
        harness.telemetry.set("cap-1", healthy_document());

        let snapshot = harness.orchestrator.analyze("cap-1").unwrap();
        assert_eq!(snapshot.capsule_id, "cap-1");
        assert_eq!(snapshot.posture_score, 100.0);
        assert!(snapshot.external_errors.is_empty());
        assert_eq!(harness.orchestrator.metrics().analyses_total, 1);

        let events = harness.analytics.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::POSTURE_ANALYZED);
        assert_eq!(events[0].capsule_id.as_deref(), Some("cap-1"));
    }

    struct RemediatingBackend {
        telemetry: Arc<MemoryTelemetrySource>,
        requests: Mutex<Vec<ActionRequest>>,
    }

    impl InfraBackend for RemediatingBackend {
        fn apply(&self, request: &ActionRequest) -> Result<ApplyOutcome, ServiceError> {
            self.requests.lock().unwrap().push(request.clone());
            if matches!(request.action, RemediationAction::ScaleUp { .. }) {
                self.telemetry.set(request.capsule_id.clone(), healthy_document());
            }
            Ok(ApplyOutcome::applied("ok"))
        }
    }

    #[test]
    fn test_optimize_runs_pipeline_and_reevaluates() {
        let registry = Arc::new(CapsuleRegistry::new(Arc::new(MemoryCapsuleStore::new())));
        let telemetry = Arc::new(MemoryTelemetrySource::new());
        let backend = Arc::new(RemediatingBackend {
            telemetry: telemetry.clone(),
            requests: Mutex::new(Vec::new()),
        });
        let evaluator = PostureEvaluator::new(telemetry.clone())
            .with_retry_policy(RetryPolicy::none());
        let executor =
            ActionExecutor::new(backend.clone()).with_retry_policy(RetryPolicy::none());
        let orchestrator = PostureOrchestrator::new(registry.clone(), evaluator, executor);
        registry
            .register(CapsuleDraft::new("worker", CapsuleType::Application).with_id("cap-1"))
            .unwrap();
        telemetry.set("cap-1", overloaded_document());

        let report = orchestrator.optimize("cap-1", None).unwrap();
        // cpu_usage triggers Scaling and ResourceAllocation, one action each.
        assert_eq!(report.execution.applied_count, 2);
        assert_eq!(report.execution.failed_count, 0);
        assert!(report.before.posture_score < report.after.posture_score);
        assert_eq!(report.after.posture_score, 100.0);
        assert!(report.analytics_error.is_none());
        assert_eq!(backend.requests.lock().unwrap().len(), 2);

        let metrics = orchestrator.metrics();
        assert_eq!(metrics.optimizations_total, 1);
        assert_eq!(metrics.actions_applied_total, 2);
        assert_eq!(metrics.actions_failed_total, 0);
    }

    #[test]
    fn test_optimize_with_strategy_filter() {
        let harness = create_test_harness();
        register_capsule(&harness, "cap-1", CapsuleType::Application);
        harness.telemetry.set("cap-1", overloaded_document());

        let report = harness
            .orchestrator
            .optimize("cap-1", Some(&[StrategyKind::Scaling]))
            .unwrap();
        assert_eq!(report.execution.executions.len(), 1);
        assert_eq!(
            report.execution.executions[0].strategy,
            StrategyKind::Scaling
        );
        assert_eq!(harness.backend.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_optimize_unknown_capsule_fails() {
        let harness = create_test_harness();

        let error = harness.orchestrator.optimize("ghost", None).unwrap_err();
        assert!(matches!(error, PostureError::CapsuleNotFound { .. }));
        assert!(harness.backend.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_monitor_registers_intent_without_executing() {
        let harness = create_test_harness();
        register_capsule(&harness, "cap-1", CapsuleType::Application);

        let handle = harness
            .orchestrator
            .monitor("cap-1", MonitorRequest::default())
            .unwrap();
        assert_eq!(handle.capsule_id, "cap-1");
        assert_eq!(
            handle.expires_at_ms,
            handle.registered_at_ms + 3_600_000
        );

        let active = harness.orchestrator.active_monitors();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].monitor_id, handle.monitor_id);
        // Intent only: nothing was dispatched to the backend.
        assert!(harness.backend.requests.lock().unwrap().is_empty());

        let events = harness.analytics.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::MONITOR_REGISTERED);
    }

    #[test]
    fn test_monitor_unknown_capsule_fails() {
        let harness = create_test_harness();

        let error = harness
            .orchestrator
            .monitor("ghost", MonitorRequest::default())
            .unwrap_err();
        assert!(matches!(error, PostureError::CapsuleNotFound { .. }));
        assert!(harness.orchestrator.active_monitors().is_empty());
    }

    #[test]
    fn test_cancel_monitor_removes_intent() {
        let harness = create_test_harness();
        register_capsule(&harness, "cap-1", CapsuleType::Application);
        let handle = harness
            .orchestrator
            .monitor("cap-1", MonitorRequest::default())
            .unwrap();

        let cancelled = harness
            .orchestrator
            .cancel_monitor(&handle.monitor_id)
            .unwrap();
        assert_eq!(cancelled.monitor_id, handle.monitor_id);
        assert!(harness.orchestrator.active_monitors().is_empty());
        assert!(harness
            .orchestrator
            .cancel_monitor(&handle.monitor_id)
            .is_none());

        let metrics = harness.orchestrator.metrics();
        assert_eq!(metrics.monitors_registered_total, 1);
        assert_eq!(metrics.monitors_cancelled_total, 1);
    }

    #[test]
    fn test_active_monitors_prunes_lapsed_intents() {
        let harness = create_test_harness();
        register_capsule(&harness, "cap-1", CapsuleType::Application);
        let request = MonitorRequest {
            duration: Duration::ZERO,
            ..MonitorRequest::default()
        };

        harness.orchestrator.monitor("cap-1", request).unwrap();
        assert!(harness.orchestrator.active_monitors().is_empty());
        assert_eq!(harness.orchestrator.metrics().monitors_registered_total, 1);
    }

    #[test]
    fn test_analyze_all_respects_filter() {
        let harness = create_test_harness();
        register_capsule(&harness, "app-1", CapsuleType::Application);
        register_capsule(&harness, "app-2", CapsuleType::Application);
        register_capsule(&harness, "data-1", CapsuleType::Data);
        for id in ["app-1", "app-2", "data-1"] {
            harness.telemetry.set(id, healthy_document());
        }

        let snapshots = harness
            .orchestrator
            .analyze_all(&CapsuleFilter::new().with_type(CapsuleType::Application))
            .unwrap();
        assert_eq!(snapshots.len(), 2);
        let ids: Vec<&str> = snapshots
            .iter()
            .map(|snapshot| snapshot.capsule_id.as_str())
            .collect();
        assert_eq!(ids, vec!["app-1", "app-2"]);
        assert_eq!(harness.orchestrator.metrics().analyses_total, 2);
    }

    struct FailingAnalytics;

    impl AnalyticsSink for FailingAnalytics {
        fn track(&self, _event: &Event) -> Result<(), ServiceError> {
            Err(ServiceError::new("collector offline"))
        }
    }

    #[test]
    fn test_analytics_failure_attaches_to_snapshot() {
        let registry = Arc::new(CapsuleRegistry::new(Arc::new(MemoryCapsuleStore::new())));
        let telemetry = Arc::new(MemoryTelemetrySource::new());
        let evaluator = PostureEvaluator::new(telemetry.clone())
            .with_retry_policy(RetryPolicy::none());
        let executor = ActionExecutor::new(Arc::new(CountingBackend::new()));
        let orchestrator = PostureOrchestrator::new(registry.clone(), evaluator, executor)
            .with_analytics(Arc::new(FailingAnalytics))
            .with_retry_policy(RetryPolicy::none());
        registry
            .register(CapsuleDraft::new("worker", CapsuleType::Application).with_id("cap-1"))
            .unwrap();
        telemetry.set("cap-1", healthy_document());

        let snapshot = orchestrator.analyze("cap-1").unwrap();
        assert_eq!(snapshot.posture_score, 100.0);
        assert_eq!(snapshot.external_errors.len(), 1);
        assert_eq!(snapshot.external_errors[0].service, ServiceKind::Analytics);
        assert_eq!(orchestrator.metrics().analytics_failures_total, 1);
    }
}
