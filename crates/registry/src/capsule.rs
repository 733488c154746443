//! Capsule record types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::lifecycle::CapsuleState;

/// Functional classification of a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleType {
    /// Deployable application workload
    Application,
    /// Managed dataset
    Data,
    /// Trained model serving inference
    Ai,
    /// Content-producing generative workload
    Generative,
    /// Protocol adapter or bridge
    Protocol,
    /// Orchestrated multi-step workflow
    Workflow,
    /// User-facing interface bundle
    Ui,
    /// Security tooling or policy enforcement
    Security,
    /// Platform-native extension
    Native,
}

impl CapsuleType {
    pub const ALL: [CapsuleType; 9] = [
        CapsuleType::Application,
        CapsuleType::Data,
        CapsuleType::Ai,
        CapsuleType::Generative,
        CapsuleType::Protocol,
        CapsuleType::Workflow,
        CapsuleType::Ui,
        CapsuleType::Security,
        CapsuleType::Native,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleType::Application => "application",
            CapsuleType::Data => "data",
            CapsuleType::Ai => "ai",
            CapsuleType::Generative => "generative",
            CapsuleType::Protocol => "protocol",
            CapsuleType::Workflow => "workflow",
            CapsuleType::Ui => "ui",
            CapsuleType::Security => "security",
            CapsuleType::Native => "native",
        }
    }
}

impl fmt::Display for CapsuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One superseded version of a capsule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// The version string that was replaced
    pub version: String,
    /// `last_updated_ms` of the capsule immediately before the change
    pub timestamp: u64,
}

/// A managed capsule record.
///
/// `id`, `registry_id`, `registered_at_ms`, `lineage` and `parent_id` are
/// immutable after registration; patches against them are ignored. The
/// `revision` counter backs optimistic concurrency in the store and is not
/// part of the caller-visible contract beyond monotonicity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    /// Unique capsule identifier
    pub id: String,
    /// Identifier of the registry instance that accepted the capsule
    pub registry_id: String,
    /// Human-readable name
    pub name: String,
    /// Functional classification
    #[serde(rename = "type")]
    pub capsule_type: CapsuleType,
    /// Current lifecycle state
    pub state: CapsuleState,
    /// Current version string
    pub version: String,
    /// Superseded versions, oldest first
    #[serde(default)]
    pub version_history: Vec<VersionEntry>,
    /// Ancestor chain, oldest ancestor first, direct parent last
    #[serde(default)]
    pub lineage: Vec<String>,
    /// Direct parent, if the capsule was derived from another
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Registration timestamp (Unix epoch milliseconds)
    pub registered_at_ms: u64,
    /// Last mutation timestamp (Unix epoch milliseconds)
    pub last_updated_ms: u64,
    /// Free-form attributes
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Optimistic concurrency token, incremented on every successful write
    pub revision: u64,
}

impl Capsule {
    /// Whether this capsule lists `id` among its ancestors.
    pub fn descends_from(&self, id: &str) -> bool {
        self.lineage.iter().any(|ancestor| ancestor == id)
    }

    /// Whether the capsule is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
