//! Registry error taxonomy.

use thiserror::Error;

use crate::lifecycle::CapsuleState;

/// Errors surfaced by capsule store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert against an id that is live or was deleted earlier
    #[error("capsule {id} already exists")]
    AlreadyExists { id: String },

    /// No live capsule under this id
    #[error("capsule {id} not found")]
    NotFound { id: String },

    /// Compare-and-swap lost against a concurrent writer
    #[error("revision conflict for capsule {id}: expected {expected}, found {found}")]
    RevisionMismatch {
        id: String,
        expected: u64,
        found: u64,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the audit journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Digest chain verification failed
    #[error("journal corruption at seq {seq_no}: {detail}")]
    CorruptionDetected { seq_no: u64, detail: String },

    /// Filesystem operation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A request field failed validation
    #[error("validation failed for `{field}`: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Registration against an id that exists or existed
    #[error("capsule {id} already exists")]
    Conflict { id: String },

    /// No capsule under this id
    #[error("capsule {id} not found")]
    NotFound { id: String },

    /// Patch requested a state change the lifecycle graph forbids
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: CapsuleState,
        to: CapsuleState,
    },

    /// Store backend failure
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Fold a store error into the registry taxonomy, promoting the
    /// conflict and not-found cases to their registry-level variants.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists { id } => RegistryError::Conflict { id },
            StoreError::NotFound { id } => RegistryError::NotFound { id },
            other => RegistryError::Store(other),
        }
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
