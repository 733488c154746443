//! Event schema for system-wide events in CapsuleCore.
//!
//! Provides standardized event types for capsule lifecycle operations,
//! posture evaluations, and remediation runs. All events are timestamped
//! and include capsule attribution where applicable. Events are delivered
//! to an [`AnalyticsSink`] on a best-effort basis.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::ServiceError;
use crate::time::unix_timestamp_ms;

/// Severity level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Informational event
    Info,
    /// Warning condition
    Warning,
    /// Error condition
    Error,
    /// Critical condition
    Critical,
}

/// Category of event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventCategory {
    /// Capsule registry operations
    Registry,
    /// Capsule state machine transitions
    Lifecycle,
    /// Posture evaluation events
    Posture,
    /// Remediation and optimization events
    Remediation,
    /// Operational state changes
    Operational,
    /// System configuration events
    Configuration,
}

/// Core event structure for all CapsuleCore events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub event_id: String,
    /// Timestamp (Unix epoch milliseconds)
    pub timestamp: u64,
    /// Event severity
    pub severity: EventSeverity,
    /// Event category
    pub category: EventCategory,
    /// Event type (specific action or state)
    pub event_type: String,
    /// Capsule the event refers to (if applicable)
    pub capsule_id: Option<String>,
    /// Source component or module
    pub source: String,
    /// Human-readable message
    pub message: String,
    /// Structured metadata
    pub metadata: EventMetadata,
}

/// Structured metadata for events.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventMetadata {
    /// Key-value pairs for additional context
    #[serde(flatten)]
    pub data: std::collections::HashMap<String, serde_json::Value>,
}

impl EventMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key-value pair.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// Builder for creating events.
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Create a new event builder.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event: Event {
                event_id: uuid::Uuid::new_v4().to_string(),
                timestamp: unix_timestamp_ms(),
                severity: EventSeverity::Info,
                category: EventCategory::Operational,
                event_type: event_type.into(),
                capsule_id: None,
                source: source.into(),
                message: String::new(),
                metadata: EventMetadata::new(),
            },
        }
    }

    /// Set the severity.
    pub fn severity(mut self, severity: EventSeverity) -> Self {
        self.event.severity = severity;
        self
    }

    /// Set the category.
    pub fn category(mut self, category: EventCategory) -> Self {
        self.event.category = category;
        self
    }

    /// Set the capsule ID.
    pub fn capsule(mut self, capsule_id: impl Into<String>) -> Self {
        self.event.capsule_id = Some(capsule_id.into());
        self
    }

    /// Set the message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self
    }

    /// Add metadata.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.event.metadata.insert(key, value);
        self
    }

    /// Build the event.
    pub fn build(self) -> Event {
        self.event
    }
}

/// Standard event types for common operations.
pub mod event_types {
    // Registry events
    pub const CAPSULE_REGISTERED: &str = "capsule.registered";
    pub const CAPSULE_UPDATED: &str = "capsule.updated";
    pub const CAPSULE_STATE_CHANGED: &str = "capsule.state_changed";
    pub const CAPSULE_DELETED: &str = "capsule.deleted";

    // Posture events
    pub const POSTURE_ANALYZED: &str = "posture.analyzed";
    pub const POSTURE_OPTIMIZED: &str = "posture.optimized";
    pub const MONITOR_REGISTERED: &str = "posture.monitor_registered";
    pub const MONITOR_CANCELLED: &str = "posture.monitor_cancelled";

    // Operational events
    pub const NODE_STARTED: &str = "operational.node_started";
    pub const NODE_STOPPED: &str = "operational.node_stopped";
    pub const COMPONENT_INITIALIZED: &str = "operational.component_initialized";
    pub const COMPONENT_FAILED: &str = "operational.component_failed";
}

/// Destination for lifecycle and posture events.
///
/// Delivery is best-effort: callers retry per policy, log the failure and
/// carry on when the sink stays unavailable.
pub trait AnalyticsSink: Send + Sync {
    /// Deliver a single event.
    fn track(&self, event: &Event) -> Result<(), ServiceError>;
}

/// Sink that writes events to the structured log.
///
/// The default sink for deployments without an analytics pipeline.
#[derive(Debug, Default)]
pub struct LogAnalytics;

impl LogAnalytics {
    pub fn new() -> Self {
        Self
    }
}

impl AnalyticsSink for LogAnalytics {
    fn track(&self, event: &Event) -> Result<(), ServiceError> {
        tracing::info!(
            target: "capsulecore::analytics",
            event_type = %event.event_type,
            capsule_id = event.capsule_id.as_deref().unwrap_or("-"),
            source = %event.source,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// In-memory sink that records every event, for tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryAnalytics {
    events: Mutex<Vec<Event>>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnalyticsSink for MemoryAnalytics {
    fn track(&self, event: &Event) -> Result<(), ServiceError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
