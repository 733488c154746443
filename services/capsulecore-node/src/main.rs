use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use capsulecore_core::event::{
    event_types, AnalyticsSink, Event, EventBuilder, EventCategory, EventSeverity, LogAnalytics,
};
use capsulecore_core::{logging, RetryPolicy};
use capsulecore_posture::{
    ActionExecutor, DryRunBackend, FsTelemetrySource, PostureEvaluator, PostureOrchestrator,
    ScoringThresholds,
};
use capsulecore_registry::{
    CapsuleFilter, CapsuleRegistry, JournalAnchor, RegistryConfig, SqliteCapsuleStore,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[derive(Debug, Deserialize)]
struct NodeConfig {
    node: NodeSection,
    #[serde(default)]
    registry: RegistryConfig,
    #[serde(default)]
    retry: RetryPolicy,
    #[serde(default)]
    posture: ScoringThresholds,
}

#[derive(Debug, Deserialize)]
struct NodeSection {
    node_id: String,
    data_dir: PathBuf,
    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    log_json: bool,
    /// Directory of per-capsule telemetry documents; absent means
    /// registry-only operation
    #[serde(default)]
    telemetry_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
    let config: NodeConfig = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

    if config.node.log_json {
        logging::init_json();
    } else {
        logging::init();
    }
    info!(node_id = %config.node.node_id, "capsulecore-node starting");

    std::fs::create_dir_all(&config.node.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.node.data_dir.display()
        )
    })?;
    let store = Arc::new(
        SqliteCapsuleStore::open(config.node.data_dir.join("capsules.db"))
            .context("Failed to open capsule store")?,
    );
    let anchor = Arc::new(
        JournalAnchor::open(config.node.data_dir.join("anchor.db"))
            .context("Failed to open anchor journal")?,
    );
    let analytics: Arc<dyn AnalyticsSink> = Arc::new(LogAnalytics::new());

    let registry = Arc::new(
        CapsuleRegistry::new(store)
            .with_config(config.registry.clone())
            .with_anchor(anchor)
            .with_analytics(analytics.clone())
            .with_retry_policy(config.retry.clone()),
    );
    info!(registry_id = %config.registry.registry_id, "Registry ready");
    track(
        &analytics,
        EventBuilder::new(event_types::COMPONENT_INITIALIZED, "node")
            .category(EventCategory::Operational)
            .message("Registry initialized")
            .metadata("component", "registry")
            .build(),
    );

    let orchestrator = wire_posture(&config, registry.clone(), &analytics);

    track(
        &analytics,
        EventBuilder::new(event_types::NODE_STARTED, "node")
            .category(EventCategory::Operational)
            .message(format!("Node {} started", config.node.node_id))
            .metadata("node_id", config.node.node_id.as_str())
            .metadata("posture_enabled", orchestrator.is_some())
            .build(),
    );

    if let Some(orchestrator) = &orchestrator {
        match orchestrator.analyze_all(&CapsuleFilter::new()) {
            Ok(snapshots) => {
                let degraded = snapshots
                    .iter()
                    .filter(|snapshot| snapshot.is_degraded())
                    .count();
                info!(
                    capsules = snapshots.len(),
                    degraded, "Startup posture sweep finished"
                );
            }
            Err(error) => warn!(error = %error, "Startup posture sweep failed"),
        }
    }

    eprintln!(
        "[capsulecore-node] started node_id={} data_dir={} posture={}",
        config.node.node_id,
        config.node.data_dir.display(),
        orchestrator.is_some()
    );

    loop {
        thread::sleep(Duration::from_secs(30));
    }
}

/// Builds the posture stack when a telemetry directory is configured and
/// present; the node otherwise runs registry-only.
fn wire_posture(
    config: &NodeConfig,
    registry: Arc<CapsuleRegistry>,
    analytics: &Arc<dyn AnalyticsSink>,
) -> Option<PostureOrchestrator> {
    let dir = match &config.node.telemetry_dir {
        Some(dir) => dir,
        None => {
            info!("No telemetry directory configured, running registry-only");
            return None;
        }
    };
    if !dir.is_dir() {
        warn!(
            telemetry_dir = %dir.display(),
            "Telemetry directory missing, running registry-only"
        );
        track(
            analytics,
            EventBuilder::new(event_types::COMPONENT_FAILED, "node")
                .category(EventCategory::Operational)
                .severity(EventSeverity::Warning)
                .message(format!(
                    "Posture stack not wired, telemetry directory {} missing",
                    dir.display()
                ))
                .metadata("component", "posture")
                .build(),
        );
        return None;
    }

    let telemetry = Arc::new(FsTelemetrySource::new(dir.clone()));
    let evaluator = PostureEvaluator::new(telemetry)
        .with_thresholds(config.posture.clone())
        .with_retry_policy(config.retry.clone());
    let executor =
        ActionExecutor::new(Arc::new(DryRunBackend::new())).with_retry_policy(config.retry.clone());
    let orchestrator = PostureOrchestrator::new(registry, evaluator, executor)
        .with_analytics(analytics.clone())
        .with_retry_policy(config.retry.clone());
    info!(telemetry_dir = %dir.display(), "Posture stack ready");
    track(
        analytics,
        EventBuilder::new(event_types::COMPONENT_INITIALIZED, "node")
            .category(EventCategory::Operational)
            .message("Posture stack initialized")
            .metadata("component", "posture")
            .build(),
    );
    Some(orchestrator)
}

fn track(analytics: &Arc<dyn AnalyticsSink>, event: Event) {
    if let Err(error) = analytics.track(&event) {
        warn!(event_type = %event.event_type, error = %error, "Failed to record node event");
    }
}

fn parse_config_path(args: &[String]) -> Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            anyhow::bail!("--config was provided without a path");
        }
    }

    anyhow::bail!("missing required --config <path> argument");
}
