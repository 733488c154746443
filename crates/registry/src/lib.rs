//! Capsule registry for the CapsuleCore system.
//!
//! This crate owns the capsule data model, the lifecycle state machine,
//! the storage backends, and the audit anchoring of registry mutations.

pub mod anchor;
pub mod capsule;
pub mod error;
pub mod journal;
pub mod lifecycle;
pub mod registry;
pub mod request;
pub mod store;

pub use anchor::{
    AnchorAction, AnchorClient, AnchorOutcome, AnchorReceipt, AnchorRecord, AnchorStatus,
    MemoryAnchor,
};
pub use capsule::{Capsule, CapsuleType, VersionEntry};
pub use error::{JournalError, RegistryError, RegistryResult, StoreError};
pub use journal::{JournalAnchor, JournalMetrics, GENESIS_DIGEST};
pub use lifecycle::CapsuleState;
pub use registry::{
    CapsuleRegistry, DeleteReceipt, HistoryReport, LineageReport, RegisterReceipt, RegistryConfig,
    RegistryMetricsSnapshot, StateChange, UpdateReceipt, VersionChange,
};
pub use request::{CapsuleDraft, CapsuleFilter, CapsulePatch};
pub use store::{CapsuleStore, MemoryCapsuleStore, SqliteCapsuleStore};
