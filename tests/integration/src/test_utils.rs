//! Test utilities for workspace integration tests

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use capsulecore_core::{MemoryAnalytics, RetryPolicy, ServiceError};
use capsulecore_posture::{
    ActionExecutor, ActionRequest, ApplyOutcome, ComplianceMetrics, HealthMetrics, InfraBackend,
    MemoryTelemetrySource, PerformanceMetrics, PostureEvaluator, PostureOrchestrator,
    SecurityMetrics, TelemetryDocument,
};
use capsulecore_registry::{
    Capsule, CapsuleDraft, CapsuleRegistry, CapsuleType, JournalAnchor, SqliteCapsuleStore,
};
use uuid::Uuid;

/// Install a compact test subscriber once; later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Create a fresh scratch directory for one test run.
pub fn create_test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("capsulecore-it-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Infrastructure backend that records every request and approves it.
#[derive(Default)]
pub struct RecordingBackend {
    requests: Mutex<Vec<ActionRequest>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl InfraBackend for RecordingBackend {
    fn apply(&self, request: &ActionRequest) -> Result<ApplyOutcome, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ApplyOutcome::applied("recorded"))
    }
}

/// Full stack wired against SQLite storage in a scratch directory.
///
/// Telemetry, analytics and the infrastructure backend are in-memory
/// doubles so scenarios can inject metrics and inspect side effects.
pub struct TestSystem {
    pub data_dir: PathBuf,
    pub registry: Arc<CapsuleRegistry>,
    pub anchor: Arc<JournalAnchor>,
    pub telemetry: Arc<MemoryTelemetrySource>,
    pub backend: Arc<RecordingBackend>,
    pub analytics: Arc<MemoryAnalytics>,
    pub orchestrator: PostureOrchestrator,
}

impl TestSystem {
    /// Build the stack: SQLite store and journal anchor on disk, registry
    /// and posture orchestrator on top. Retries are disabled so outage
    /// scenarios fail fast.
    pub fn create() -> Self {
        init_test_logging();
        let data_dir = create_test_dir();
        let store = Arc::new(SqliteCapsuleStore::open(data_dir.join("capsules.db")).unwrap());
        let anchor = Arc::new(JournalAnchor::open(data_dir.join("anchor.db")).unwrap());
        let analytics = Arc::new(MemoryAnalytics::new());
        let registry = Arc::new(
            CapsuleRegistry::new(store)
                .with_anchor(anchor.clone())
                .with_analytics(analytics.clone())
                .with_retry_policy(RetryPolicy::none()),
        );

        let telemetry = Arc::new(MemoryTelemetrySource::new());
        let backend = Arc::new(RecordingBackend::new());
        let evaluator =
            PostureEvaluator::new(telemetry.clone()).with_retry_policy(RetryPolicy::none());
        let executor =
            ActionExecutor::new(backend.clone()).with_retry_policy(RetryPolicy::none());
        let orchestrator = PostureOrchestrator::new(registry.clone(), evaluator, executor)
            .with_analytics(analytics.clone())
            .with_retry_policy(RetryPolicy::none());

        Self {
            data_dir,
            registry,
            anchor,
            telemetry,
            backend,
            analytics,
            orchestrator,
        }
    }

    /// Register an application capsule under the given id.
    pub fn register_capsule(&self, id: &str) -> Capsule {
        let draft = CapsuleDraft::new(format!("{id}-service"), CapsuleType::Application)
            .with_id(id);
        self.registry.register(draft).unwrap().capsule
    }

    /// Event types delivered to the analytics sink, in delivery order.
    pub fn event_types(&self) -> Vec<String> {
        self.analytics
            .events()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }
}

/// Telemetry for a capsule in perfect shape: every sub-score lands on 100.
pub fn healthy_telemetry() -> TelemetryDocument {
    TelemetryDocument {
        health: HealthMetrics {
            cpu_usage_pct: 0.0,
            memory_usage_pct: 0.0,
            disk_usage_pct: 0.0,
            network_latency_ms: 0.0,
            error_rate_pct: 0.0,
            response_time_ms: 0.0,
        },
        performance: PerformanceMetrics {
            throughput: 100.0,
            concurrency: 50.0,
            queue_depth: 0.0,
            processing_time_ms: 0.0,
        },
        security: SecurityMetrics {
            vulnerability_count: 0,
            patch_level_pct: 100.0,
            auth_failure_count: 0,
            encryption_level: 5,
        },
        compliance: ComplianceMetrics {
            policy_violation_count: 0,
            compliance_score_pct: 100.0,
            audit_readiness_pct: 100.0,
        },
    }
}

/// Telemetry for an overloaded, vulnerable capsule: every dimension
/// carries at least one sub-score below its issue bars.
pub fn degraded_telemetry() -> TelemetryDocument {
    TelemetryDocument {
        health: HealthMetrics {
            cpu_usage_pct: 95.0,
            memory_usage_pct: 88.0,
            disk_usage_pct: 91.0,
            network_latency_ms: 600.0,
            error_rate_pct: 6.0,
            response_time_ms: 800.0,
        },
        performance: PerformanceMetrics {
            throughput: 20.0,
            concurrency: 5.0,
            queue_depth: 180.0,
            processing_time_ms: 900.0,
        },
        security: SecurityMetrics {
            vulnerability_count: 3,
            patch_level_pct: 55.0,
            auth_failure_count: 7,
            encryption_level: 2,
        },
        compliance: ComplianceMetrics {
            policy_violation_count: 2,
            compliance_score_pct: 58.0,
            audit_readiness_pct: 45.0,
        },
    }
}
