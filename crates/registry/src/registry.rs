//! Capsule registry: the single write path for capsule records.
//!
//! The registry validates requests, drives the lifecycle state machine,
//! and persists through a [`CapsuleStore`]. Writes use optimistic
//! concurrency: each mutation re-reads the record, applies the patch and
//! compare-and-swaps on the revision it saw, retrying a bounded number of
//! times when a concurrent writer got there first.
//!
//! Anchoring and analytics are best-effort side channels. Their failures
//! are retried per policy, then attached to the operation receipt; the
//! primary mutation never rolls back because a side channel was down.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use capsulecore_core::error::{ExternalServiceError, ServiceKind};
use capsulecore_core::event::{
    event_types, AnalyticsSink, Event, EventBuilder, EventCategory, EventSeverity,
};
use capsulecore_core::retry::RetryPolicy;
use capsulecore_core::time::unix_timestamp_ms;

use crate::anchor::{AnchorAction, AnchorClient, AnchorOutcome, AnchorReceipt, AnchorRecord};
use crate::capsule::{Capsule, VersionEntry};
use crate::error::{RegistryError, RegistryResult, StoreError};
use crate::lifecycle::CapsuleState;
use crate::request::{CapsuleDraft, CapsuleFilter, CapsulePatch};
use crate::store::CapsuleStore;

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Identifier stamped into every capsule this instance accepts.
    #[serde(default = "default_registry_id")]
    pub registry_id: String,

    /// Lifecycle state assigned when a draft does not name one.
    #[serde(default = "default_state")]
    pub default_state: CapsuleState,

    /// Version assigned when a draft does not name one.
    #[serde(default = "default_initial_version")]
    pub initial_version: String,

    /// Upper bound on compare-and-swap retries per update.
    #[serde(default = "default_cas_retry_limit")]
    pub cas_retry_limit: u32,
}

fn default_registry_id() -> String {
    "registry-01".to_string()
}

const fn default_state() -> CapsuleState {
    CapsuleState::Created
}

fn default_initial_version() -> String {
    "1.0.0".to_string()
}

const fn default_cas_retry_limit() -> u32 {
    8
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_id: default_registry_id(),
            default_state: default_state(),
            initial_version: default_initial_version(),
            cas_retry_limit: default_cas_retry_limit(),
        }
    }
}

/// Observability counters for the registry.
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    registered_total: AtomicU64,
    updated_total: AtomicU64,
    deleted_total: AtomicU64,
    conflicts_total: AtomicU64,
    invalid_transitions_total: AtomicU64,
    cas_retries_total: AtomicU64,
    anchor_failures_total: AtomicU64,
    analytics_failures_total: AtomicU64,
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMetricsSnapshot {
    pub registered_total: u64,
    pub updated_total: u64,
    pub deleted_total: u64,
    pub conflicts_total: u64,
    pub invalid_transitions_total: u64,
    pub cas_retries_total: u64,
    pub anchor_failures_total: u64,
    pub analytics_failures_total: u64,
}

impl RegistryMetrics {
    fn snapshot(&self) -> RegistryMetricsSnapshot {
        RegistryMetricsSnapshot {
            registered_total: self.registered_total.load(Ordering::Relaxed),
            updated_total: self.updated_total.load(Ordering::Relaxed),
            deleted_total: self.deleted_total.load(Ordering::Relaxed),
            conflicts_total: self.conflicts_total.load(Ordering::Relaxed),
            invalid_transitions_total: self.invalid_transitions_total.load(Ordering::Relaxed),
            cas_retries_total: self.cas_retries_total.load(Ordering::Relaxed),
            anchor_failures_total: self.anchor_failures_total.load(Ordering::Relaxed),
            analytics_failures_total: self.analytics_failures_total.load(Ordering::Relaxed),
        }
    }
}

/// A lifecycle transition applied by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: CapsuleState,
    pub to: CapsuleState,
}

/// A version replacement applied by an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub from: String,
    pub to: String,
}

/// Receipt for a successful registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReceipt {
    /// The capsule as stored
    pub capsule: Capsule,
    /// Outcome of the best-effort anchoring step
    pub anchor: AnchorOutcome,
    /// Analytics delivery failure, if any
    pub analytics_error: Option<ExternalServiceError>,
}

/// Receipt for a successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReceipt {
    /// The capsule after the patch
    pub capsule: Capsule,
    /// Lifecycle transition, when the patch changed state
    pub state_change: Option<StateChange>,
    /// Version replacement, when the patch changed version
    pub version_change: Option<VersionChange>,
    /// Outcome of the best-effort anchoring step
    pub anchor: AnchorOutcome,
    /// Analytics delivery failure, if any
    pub analytics_error: Option<ExternalServiceError>,
}

/// Receipt for a successful deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReceipt {
    /// Snapshot of the capsule immediately before deletion
    pub capsule: Capsule,
    /// When the deletion completed (Unix epoch milliseconds)
    pub deleted_at_ms: u64,
    /// Outcome of the best-effort anchoring step
    pub anchor: AnchorOutcome,
    /// Analytics delivery failure, if any
    pub analytics_error: Option<ExternalServiceError>,
}

/// Ancestors and descendants of one capsule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageReport {
    pub capsule_id: String,
    /// Direct parent, if any
    pub parent_id: Option<String>,
    /// Ancestor chain, oldest first
    pub ancestors: Vec<String>,
    /// Capsules listing this one among their ancestors, by registration order
    pub descendants: Vec<String>,
}

/// Version and audit history of one capsule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub capsule_id: String,
    /// Current version
    pub version: String,
    /// Superseded versions, oldest first
    pub version_history: Vec<VersionEntry>,
    pub registered_at_ms: u64,
    pub last_updated_ms: u64,
    /// Anchor receipts for this capsule, oldest first
    pub anchor_history: Vec<AnchorReceipt>,
    /// Set when the anchor could not be queried
    pub anchor_error: Option<ExternalServiceError>,
}

#[derive(Debug, Default)]
struct PatchDelta {
    state: Option<StateChange>,
    version: Option<VersionChange>,
}

/// The capsule registry.
pub struct CapsuleRegistry {
    store: Arc<dyn CapsuleStore>,
    anchor: Option<Arc<dyn AnchorClient>>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    config: RegistryConfig,
    retry: RetryPolicy,
    metrics: RegistryMetrics,
}

impl CapsuleRegistry {
    /// Create a registry over a store, with default configuration and no
    /// side channels.
    pub fn new(store: Arc<dyn CapsuleStore>) -> Self {
        Self {
            store,
            anchor: None,
            analytics: None,
            config: RegistryConfig::default(),
            retry: RetryPolicy::default(),
            metrics: RegistryMetrics::default(),
        }
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_anchor(mut self, anchor: Arc<dyn AnchorClient>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Registry configuration in effect.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Point-in-time copy of the registry counters.
    pub fn metrics(&self) -> RegistryMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Register a new capsule.
    ///
    /// `name` and `type` are required; id, state and version fall back to
    /// generated or configured defaults. Lineage is derived once from the
    /// parent and never changes afterwards. A parent id that is not
    /// registered is kept as a single-link lineage rather than rejected.
    pub fn register(&self, draft: CapsuleDraft) -> RegistryResult<RegisterReceipt> {
        let name = match draft.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(RegistryError::Validation {
                    field: "name",
                    reason: "must be a non-empty string".to_string(),
                })
            }
        };
        let capsule_type = match draft.capsule_type {
            Some(capsule_type) => capsule_type,
            None => {
                return Err(RegistryError::Validation {
                    field: "type",
                    reason: "capsule classification is required".to_string(),
                })
            }
        };
        let id = match draft.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            Some(_) => {
                return Err(RegistryError::Validation {
                    field: "id",
                    reason: "must not be blank when provided".to_string(),
                })
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        let version = match draft.version.as_deref().map(str::trim) {
            Some(version) if !version.is_empty() => version.to_string(),
            Some(_) => {
                return Err(RegistryError::Validation {
                    field: "version",
                    reason: "must not be blank when provided".to_string(),
                })
            }
            None => self.config.initial_version.clone(),
        };

        let lineage = self.derive_lineage(draft.parent_id.as_deref())?;
        let now = unix_timestamp_ms();

        let capsule = Capsule {
            id,
            registry_id: self.config.registry_id.clone(),
            name,
            capsule_type,
            state: draft.state.unwrap_or(self.config.default_state),
            version,
            version_history: Vec::new(),
            lineage,
            parent_id: draft.parent_id,
            registered_at_ms: now,
            last_updated_ms: now,
            attributes: draft.attributes,
            revision: 1,
        };

        self.store.insert(&capsule).map_err(|err| {
            if matches!(err, StoreError::AlreadyExists { .. }) {
                self.metrics.conflicts_total.fetch_add(1, Ordering::Relaxed);
            }
            RegistryError::from_store(err)
        })?;

        self.metrics.registered_total.fetch_add(1, Ordering::Relaxed);
        info!(
            capsule_id = %capsule.id,
            capsule_type = %capsule.capsule_type,
            state = %capsule.state,
            "Capsule registered"
        );

        let anchor = self.anchor_mutation(AnchorRecord::new(
            capsule.id.as_str(),
            AnchorAction::Registered,
            serde_json::json!({ "capsule": &capsule }),
        ));
        let analytics_error = self.track(
            EventBuilder::new(event_types::CAPSULE_REGISTERED, "registry")
                .category(EventCategory::Registry)
                .capsule(capsule.id.as_str())
                .message(format!("Capsule {} registered", capsule.name))
                .metadata("type", capsule.capsule_type.as_str())
                .metadata("state", capsule.state.as_str())
                .metadata("version", capsule.version.as_str())
                .build(),
        );

        Ok(RegisterReceipt {
            capsule,
            anchor,
            analytics_error,
        })
    }

    /// Fetch a capsule by id.
    pub fn get(&self, id: &str) -> RegistryResult<Capsule> {
        self.store
            .get(id)
            .map_err(RegistryError::from_store)?
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// All capsules matching `filter`, ordered by registration time then id.
    pub fn list(&self, filter: &CapsuleFilter) -> RegistryResult<Vec<Capsule>> {
        let capsules = self.store.list().map_err(RegistryError::from_store)?;
        Ok(capsules
            .into_iter()
            .filter(|capsule| filter.matches(capsule))
            .collect())
    }

    /// Apply a patch to a capsule.
    ///
    /// State changes must follow the lifecycle graph. A version change
    /// archives the previous version into `version_history` together with
    /// the timestamp the record carried before this update. Every
    /// successful update refreshes `last_updated_ms` and bumps the
    /// revision, also for patches that set nothing.
    pub fn update(&self, id: &str, patch: &CapsulePatch) -> RegistryResult<UpdateReceipt> {
        let mut attempt: u32 = 0;
        let (capsule, delta) = loop {
            let current = self
                .store
                .get(id)
                .map_err(RegistryError::from_store)?
                .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;

            let (candidate, delta) = self.apply_patch(&current, patch)?;

            match self.store.compare_and_swap(current.revision, &candidate) {
                Ok(()) => break (candidate, delta),
                Err(StoreError::RevisionMismatch { .. })
                    if attempt + 1 < self.config.cas_retry_limit =>
                {
                    attempt += 1;
                    self.metrics.cas_retries_total.fetch_add(1, Ordering::Relaxed);
                    debug!(capsule_id = %id, attempt = attempt, "Revision conflict, retrying update");
                }
                Err(err) => return Err(RegistryError::from_store(err)),
            }
        };

        self.metrics.updated_total.fetch_add(1, Ordering::Relaxed);
        info!(
            capsule_id = %capsule.id,
            revision = capsule.revision,
            state = %capsule.state,
            "Capsule updated"
        );

        let mut payload = serde_json::json!({
            "state": capsule.state,
            "version": capsule.version,
            "revision": capsule.revision,
        });
        if let Some(change) = &delta.state {
            payload["state_change"] = serde_json::json!({ "from": change.from, "to": change.to });
        }
        if let Some(change) = &delta.version {
            payload["version_change"] =
                serde_json::json!({ "from": change.from, "to": change.to });
        }
        let anchor =
            self.anchor_mutation(AnchorRecord::new(id, AnchorAction::Updated, payload));

        let analytics_error = self.track(self.update_event(&capsule, &delta));

        Ok(UpdateReceipt {
            capsule,
            state_change: delta.state,
            version_change: delta.version,
            anchor,
            analytics_error,
        })
    }

    /// Delete a capsule, tombstoning its id.
    pub fn delete(&self, id: &str) -> RegistryResult<DeleteReceipt> {
        let capsule = self.store.remove(id).map_err(RegistryError::from_store)?;
        let deleted_at_ms = unix_timestamp_ms();

        self.metrics.deleted_total.fetch_add(1, Ordering::Relaxed);
        info!(
            capsule_id = %capsule.id,
            state = %capsule.state,
            "Capsule deleted"
        );

        let anchor = self.anchor_mutation(AnchorRecord::new(
            id,
            AnchorAction::Deleted,
            serde_json::json!({ "capsule": &capsule }),
        ));
        let analytics_error = self.track(
            EventBuilder::new(event_types::CAPSULE_DELETED, "registry")
                .category(EventCategory::Registry)
                .capsule(id)
                .message(format!("Capsule {} deleted", capsule.name))
                .metadata("final_state", capsule.state.as_str())
                .metadata("version", capsule.version.as_str())
                .build(),
        );

        Ok(DeleteReceipt {
            capsule,
            deleted_at_ms,
            anchor,
            analytics_error,
        })
    }

    /// Ancestors and descendants of a capsule.
    pub fn lineage(&self, id: &str) -> RegistryResult<LineageReport> {
        let capsule = self.get(id)?;
        let descendants = self
            .store
            .list()
            .map_err(RegistryError::from_store)?
            .into_iter()
            .filter(|other| other.descends_from(id))
            .map(|other| other.id)
            .collect();

        Ok(LineageReport {
            capsule_id: capsule.id,
            parent_id: capsule.parent_id,
            ancestors: capsule.lineage,
            descendants,
        })
    }

    /// Version history plus anchor receipts for a capsule.
    ///
    /// An unreachable anchor degrades to an empty receipt list with the
    /// failure attached; the version history still comes back.
    pub fn history(&self, id: &str) -> RegistryResult<HistoryReport> {
        let capsule = self.get(id)?;

        let (anchor_history, anchor_error) = match &self.anchor {
            None => (Vec::new(), None),
            Some(anchor) => match self.retry.run(ServiceKind::Anchor, || anchor.history(id)) {
                Ok(receipts) => (receipts, None),
                Err(error) => {
                    self.metrics
                        .anchor_failures_total
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(capsule_id = %id, error = %error, "Anchor history unavailable");
                    (Vec::new(), Some(error))
                }
            },
        };

        Ok(HistoryReport {
            capsule_id: capsule.id,
            version: capsule.version,
            version_history: capsule.version_history,
            registered_at_ms: capsule.registered_at_ms,
            last_updated_ms: capsule.last_updated_ms,
            anchor_history,
            anchor_error,
        })
    }

    fn derive_lineage(&self, parent_id: Option<&str>) -> RegistryResult<Vec<String>> {
        let parent_id = match parent_id {
            Some(parent_id) => parent_id,
            None => return Ok(Vec::new()),
        };
        match self.store.get(parent_id).map_err(RegistryError::from_store)? {
            Some(parent) => {
                let mut lineage = parent.lineage;
                lineage.push(parent.id);
                Ok(lineage)
            }
            None => {
                warn!(
                    parent_id = %parent_id,
                    "Parent capsule not registered, keeping single-link lineage"
                );
                Ok(vec![parent_id.to_string()])
            }
        }
    }

    fn apply_patch(
        &self,
        current: &Capsule,
        patch: &CapsulePatch,
    ) -> RegistryResult<(Capsule, PatchDelta)> {
        let mut updated = current.clone();
        let mut delta = PatchDelta::default();

        if let Some(state) = patch.state {
            if state != current.state {
                if !current.state.can_transition_to(state) {
                    self.metrics
                        .invalid_transitions_total
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(RegistryError::InvalidStateTransition {
                        from: current.state,
                        to: state,
                    });
                }
                updated.state = state;
                delta.state = Some(StateChange {
                    from: current.state,
                    to: state,
                });
            }
        }

        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(RegistryError::Validation {
                    field: "name",
                    reason: "must be a non-empty string".to_string(),
                });
            }
            updated.name = name.to_string();
        }

        if let Some(capsule_type) = patch.capsule_type {
            updated.capsule_type = capsule_type;
        }

        if let Some(version) = &patch.version {
            let version = version.trim();
            if version.is_empty() {
                return Err(RegistryError::Validation {
                    field: "version",
                    reason: "must be a non-empty string".to_string(),
                });
            }
            if version != current.version {
                updated.version_history.push(VersionEntry {
                    version: current.version.clone(),
                    timestamp: current.last_updated_ms,
                });
                updated.version = version.to_string();
                delta.version = Some(VersionChange {
                    from: current.version.clone(),
                    to: version.to_string(),
                });
            }
        }

        for (key, value) in &patch.attributes {
            updated.attributes.insert(key.clone(), value.clone());
        }

        updated.last_updated_ms = unix_timestamp_ms();
        updated.revision = current.revision + 1;

        Ok((updated, delta))
    }

    fn update_event(&self, capsule: &Capsule, delta: &PatchDelta) -> Event {
        match &delta.state {
            Some(change) => {
                let severity = if change.to == CapsuleState::Failed {
                    EventSeverity::Warning
                } else {
                    EventSeverity::Info
                };
                EventBuilder::new(event_types::CAPSULE_STATE_CHANGED, "registry")
                    .category(EventCategory::Lifecycle)
                    .severity(severity)
                    .capsule(capsule.id.as_str())
                    .message(format!(
                        "Capsule {} transitioned {} -> {}",
                        capsule.name, change.from, change.to
                    ))
                    .metadata("from", change.from.as_str())
                    .metadata("to", change.to.as_str())
                    .metadata("revision", capsule.revision)
                    .build()
            }
            None => EventBuilder::new(event_types::CAPSULE_UPDATED, "registry")
                .category(EventCategory::Registry)
                .capsule(capsule.id.as_str())
                .message(format!("Capsule {} updated", capsule.name))
                .metadata("version", capsule.version.as_str())
                .metadata("revision", capsule.revision)
                .build(),
        }
    }

    fn anchor_mutation(&self, record: AnchorRecord) -> AnchorOutcome {
        let anchor = match &self.anchor {
            Some(anchor) => anchor,
            None => return AnchorOutcome::Disabled,
        };
        match self.retry.run(ServiceKind::Anchor, || anchor.record(&record)) {
            Ok(receipt) => AnchorOutcome::Recorded { receipt },
            Err(error) => {
                self.metrics
                    .anchor_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    capsule_id = %record.capsule_id,
                    action = %record.action,
                    error = %error,
                    "Anchor unavailable, continuing without receipt"
                );
                AnchorOutcome::Unavailable { error }
            }
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
