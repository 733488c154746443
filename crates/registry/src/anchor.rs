//! Audit anchoring for registry mutations.
//!
//! Every successful register, update and delete produces an [`AnchorRecord`]
//! that is handed to an [`AnchorClient`] on a best-effort basis. The payload
//! digest lets auditors verify the anchored payload was not altered after
//! the fact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

use capsulecore_core::error::{ExternalServiceError, ServiceError};
use capsulecore_core::time::unix_timestamp_ms;

/// Which registry mutation an anchor record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorAction {
    Registered,
    Updated,
    Deleted,
}

impl AnchorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorAction::Registered => "registered",
            AnchorAction::Updated => "updated",
            AnchorAction::Deleted => "deleted",
        }
    }
}

impl fmt::Display for AnchorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An auditable record of one registry mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    /// Unique record identifier
    pub record_id: String,
    /// Capsule the mutation applied to
    pub capsule_id: String,
    /// Mutation kind
    pub action: AnchorAction,
    /// When the mutation completed (Unix epoch milliseconds)
    pub timestamp: u64,
    /// Snapshot or summary of the mutation
    pub payload: serde_json::Value,
    /// BLAKE3 digest of the serialized payload, hex encoded
    pub payload_digest: String,
}

impl AnchorRecord {
    pub fn new(
        capsule_id: impl Into<String>,
        action: AnchorAction,
        payload: serde_json::Value,
    ) -> Self {
        let payload_digest = digest_payload(&payload);
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            capsule_id: capsule_id.into(),
            action,
            timestamp: unix_timestamp_ms(),
            payload,
            payload_digest,
        }
    }
}

/// BLAKE3 digest of a payload's canonical JSON text, hex encoded.
pub fn digest_payload(payload: &serde_json::Value) -> String {
    hex::encode(blake3::hash(payload.to_string().as_bytes()).as_bytes())
}

/// Whether the anchor has durably recorded the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    /// Durably recorded
    Recorded,
    /// Accepted but not yet final (remote anchors)
    Pending,
}

/// Acknowledgement returned by an anchor backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Record this receipt acknowledges
    pub record_id: String,
    /// Capsule the record refers to
    pub capsule_id: String,
    /// Mutation kind
    pub action: AnchorAction,
    /// Timestamp copied from the record
    pub timestamp: u64,
    /// Digest copied from the record
    pub payload_digest: String,
    /// Backend-side reference, e.g. a journal sequence number
    pub reference: String,
    /// Recording status
    pub status: AnchorStatus,
}

/// Result of the best-effort anchoring step attached to registry receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnchorOutcome {
    /// The anchor acknowledged the record
    Recorded { receipt: AnchorReceipt },
    /// The anchor stayed unavailable through all retries
    Unavailable { error: ExternalServiceError },
    /// No anchor is configured
    Disabled,
}

impl AnchorOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, AnchorOutcome::Recorded { .. })
    }
}

/// Backend that durably records anchor entries.
pub trait AnchorClient: Send + Sync {
    /// Record a single entry, returning an acknowledgement.
    fn record(&self, record: &AnchorRecord) -> Result<AnchorReceipt, ServiceError>;

    /// All receipts for one capsule, oldest first.
    fn history(&self, capsule_id: &str) -> Result<Vec<AnchorReceipt>, ServiceError>;
}

/// In-memory anchor for tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryAnchor {
    entries: Mutex<Vec<(AnchorRecord, AnchorReceipt)>>,
}

impl MemoryAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries, oldest first.
    pub fn entries(&self) -> Vec<(AnchorRecord, AnchorReceipt)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnchorClient for MemoryAnchor {
    fn record(&self, record: &AnchorRecord) -> Result<AnchorReceipt, ServiceError> {
        let mut entries = self.entries.lock().unwrap();
        let receipt = AnchorReceipt {
            record_id: record.record_id.clone(),
            capsule_id: record.capsule_id.clone(),
            action: record.action,
            timestamp: record.timestamp,
            payload_digest: record.payload_digest.clone(),
            reference: format!("mem:{}", entries.len() + 1),
            status: AnchorStatus::Recorded,
        };
        entries.push((record.clone(), receipt.clone()));
        Ok(receipt)
    }

    fn history(&self, capsule_id: &str) -> Result<Vec<AnchorReceipt>, ServiceError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(record, _)| record.capsule_id == capsule_id)
            .map(|(_, receipt)| receipt.clone())
            .collect())
    }
}
