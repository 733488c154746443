//! Telemetry sources for posture evaluation.
//!
//! A [`TelemetrySource`] answers point-in-time metric queries for one
//! capsule across the four posture dimensions. Sources are external
//! collaborators: calls are retried per policy and an unavailable source
//! degrades the affected dimension instead of failing the evaluation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use capsulecore_core::error::ServiceError;

/// Resource and responsiveness metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// CPU usage in percent
    pub cpu_usage_pct: f64,
    /// Memory usage in percent
    pub memory_usage_pct: f64,
    /// Disk usage in percent
    pub disk_usage_pct: f64,
    /// Network round-trip latency in milliseconds
    pub network_latency_ms: f64,
    /// Request error rate in percent
    pub error_rate_pct: f64,
    /// Mean response time in milliseconds
    pub response_time_ms: f64,
}

/// Throughput and queueing metrics, compared against configured baselines.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Requests processed per second
    pub throughput: f64,
    /// Concurrent requests in flight
    pub concurrency: f64,
    /// Items waiting in the work queue
    pub queue_depth: f64,
    /// Mean processing time per item in milliseconds
    pub processing_time_ms: f64,
}

/// Security findings and hardening level.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityMetrics {
    /// Known open vulnerabilities
    pub vulnerability_count: u32,
    /// Fraction of applicable patches installed, in percent
    pub patch_level_pct: f64,
    /// Failed authentication attempts in the sampling window
    pub auth_failure_count: u32,
    /// Encryption level on a 0..=5 scale
    pub encryption_level: u8,
}

/// Policy adherence metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComplianceMetrics {
    /// Open policy violations
    pub policy_violation_count: u32,
    /// Aggregate compliance score in percent
    pub compliance_score_pct: f64,
    /// Audit readiness in percent
    pub audit_readiness_pct: f64,
}

/// All four metric families for one capsule.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryDocument {
    pub health: HealthMetrics,
    pub performance: PerformanceMetrics,
    pub security: SecurityMetrics,
    pub compliance: ComplianceMetrics,
}

/// Point-in-time metric queries for a capsule.
pub trait TelemetrySource: Send + Sync {
    fn health(&self, capsule_id: &str) -> Result<HealthMetrics, ServiceError>;
    fn performance(&self, capsule_id: &str) -> Result<PerformanceMetrics, ServiceError>;
    fn security(&self, capsule_id: &str) -> Result<SecurityMetrics, ServiceError>;
    fn compliance(&self, capsule_id: &str) -> Result<ComplianceMetrics, ServiceError>;
}

/// In-memory source fed by `set`, for tests and embedders that push
/// metrics themselves.
#[derive(Debug, Default)]
pub struct MemoryTelemetrySource {
    documents: RwLock<HashMap<String, TelemetryDocument>>,
}

impl MemoryTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the document for a capsule.
    pub fn set(&self, capsule_id: impl Into<String>, document: TelemetryDocument) {
        self.documents
            .write()
            .unwrap()
            .insert(capsule_id.into(), document);
    }

    /// Drop the document for a capsule, making lookups fail.
    pub fn remove(&self, capsule_id: &str) {
        self.documents.write().unwrap().remove(capsule_id);
    }

    fn document(&self, capsule_id: &str) -> Result<TelemetryDocument, ServiceError> {
        self.documents
            .read()
            .unwrap()
            .get(capsule_id)
            .copied()
            .ok_or_else(|| ServiceError::new(format!("no telemetry for capsule {capsule_id}")))
    }
}

impl TelemetrySource for MemoryTelemetrySource {
    fn health(&self, capsule_id: &str) -> Result<HealthMetrics, ServiceError> {
        Ok(self.document(capsule_id)?.health)
    }

    fn performance(&self, capsule_id: &str) -> Result<PerformanceMetrics, ServiceError> {
        Ok(self.document(capsule_id)?.performance)
    }

    fn security(&self, capsule_id: &str) -> Result<SecurityMetrics, ServiceError> {
        Ok(self.document(capsule_id)?.security)
    }

    fn compliance(&self, capsule_id: &str) -> Result<ComplianceMetrics, ServiceError> {
        Ok(self.document(capsule_id)?.compliance)
    }
}

/// Source reading `<capsule_id>.json` documents from a directory.
///
/// Used by the node when an agent drops metric files next to the data
/// directory. Files are re-read on every query.
#[derive(Debug, Clone)]
pub struct FsTelemetrySource {
    root: PathBuf,
}

impl FsTelemetrySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn load(&self, capsule_id: &str) -> Result<TelemetryDocument, ServiceError> {
        // Ids become file names; refuse anything that could leave the root.
        if capsule_id.contains('/') || capsule_id.contains('\\') || capsule_id.contains("..") {
            return Err(ServiceError::new(format!(
                "capsule id {capsule_id} is not a valid telemetry file name"
            )));
        }
        let path = self.root.join(format!("{capsule_id}.json"));
        let raw = std::fs::read_to_string(&path)
            .map_err(|err| ServiceError::new(format!("read {}: {err}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|err| ServiceError::new(format!("parse {}: {err}", path.display())))
    }
}

impl TelemetrySource for FsTelemetrySource {
    fn health(&self, capsule_id: &str) -> Result<HealthMetrics, ServiceError> {
        Ok(self.load(capsule_id)?.health)
    }

    fn performance(&self, capsule_id: &str) -> Result<PerformanceMetrics, ServiceError> {
        Ok(self.load(capsule_id)?.performance)
    }

    fn security(&self, capsule_id: &str) -> Result<SecurityMetrics, ServiceError> {
        Ok(self.load(capsule_id)?.security)
    }

    fn compliance(&self, capsule_id: &str) -> Result<ComplianceMetrics, ServiceError> {
        Ok(self.load(capsule_id)?.compliance)
    }
}
