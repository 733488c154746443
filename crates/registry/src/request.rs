//! Request types for registry operations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capsule::{Capsule, CapsuleType};
use crate::lifecycle::CapsuleState;

/// Registration request. Unset fields fall back to registry defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapsuleDraft {
    /// Explicit capsule id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Human-readable name. Required, must be non-empty after trimming
    #[serde(default)]
    pub name: Option<String>,
    /// Functional classification. Required
    #[serde(default, rename = "type")]
    pub capsule_type: Option<CapsuleType>,
    /// Initial lifecycle state; defaults per registry config
    #[serde(default)]
    pub state: Option<CapsuleState>,
    /// Initial version string; defaults per registry config
    #[serde(default)]
    pub version: Option<String>,
    /// Parent capsule for lineage derivation
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Free-form attributes
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl CapsuleDraft {
    pub fn new(name: impl Into<String>, capsule_type: CapsuleType) -> Self {
        Self {
            name: Some(name.into()),
            capsule_type: Some(capsule_type),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_state(mut self, state: CapsuleState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Partial update for a capsule. Unset fields are left untouched.
///
/// Patches never touch `id`, `registry_id`, `registered_at_ms`, `lineage` or
/// `parent_id`; those fields are fixed at registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapsulePatch {
    /// Replace the name
    #[serde(default)]
    pub name: Option<String>,
    /// Replace the classification
    #[serde(default, rename = "type")]
    pub capsule_type: Option<CapsuleType>,
    /// Request a lifecycle transition
    #[serde(default)]
    pub state: Option<CapsuleState>,
    /// Replace the version, archiving the previous one
    #[serde(default)]
    pub version: Option<String>,
    /// Attribute upserts, merged key by key
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl CapsulePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, capsule_type: CapsuleType) -> Self {
        self.capsule_type = Some(capsule_type);
        self
    }

    pub fn with_state(mut self, state: CapsuleState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// A patch with nothing set is a no-op.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.capsule_type.is_none()
            && self.state.is_none()
            && self.version.is_none()
            && self.attributes.is_empty()
    }
}

/// Filter for list queries. All set criteria must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapsuleFilter {
    /// Match on classification
    #[serde(default, rename = "type")]
    pub capsule_type: Option<CapsuleType>,
    /// Match on lifecycle state
    #[serde(default)]
    pub state: Option<CapsuleState>,
    /// Match names containing this substring (case-sensitive)
    #[serde(default)]
    pub name_contains: Option<String>,
    /// Match on direct parent
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl CapsuleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, capsule_type: CapsuleType) -> Self {
        self.capsule_type = Some(capsule_type);
        self
    }

    pub fn with_state(mut self, state: CapsuleState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_name_contains(mut self, fragment: impl Into<String>) -> Self {
        self.name_contains = Some(fragment.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Whether `capsule` satisfies every set criterion.
    pub fn matches(&self, capsule: &Capsule) -> bool {
        if let Some(capsule_type) = self.capsule_type {
            if capsule.capsule_type != capsule_type {
                return false;
            }
        }
        if let Some(state) = self.state {
            if capsule.state != state {
                return false;
            }
        }
        if let Some(fragment) = &self.name_contains {
            if !capsule.name.contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(parent_id) = &self.parent_id {
            if capsule.parent_id.as_deref() != Some(parent_id.as_str()) {
                return false;
            }
        }
        true
    }
}
