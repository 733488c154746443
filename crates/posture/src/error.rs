//! Posture workflow errors.

use capsulecore_registry::RegistryError;
use thiserror::Error;

/// Errors surfaced by the posture orchestrator.
#[derive(Debug, Error)]
pub enum PostureError {
    /// The capsule to analyze, optimize or monitor does not exist
    #[error("Capsule not found: {id}")]
    CapsuleNotFound { id: String },

    /// Registry access failed
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type PostureResult<T> = Result<T, PostureError>;
