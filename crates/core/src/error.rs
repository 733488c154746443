//! Shared error types for external collaborator calls.
//!
//! Collaborator traits (anchor, telemetry, analytics, infrastructure) report
//! failures as [`ServiceError`]. The retry layer converts an exhausted call
//! into an [`ExternalServiceError`] carrying the service kind and attempt
//! count, which callers attach to receipts instead of failing the primary
//! operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// External services the system talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Durable audit anchor (journal or remote ledger)
    Anchor,
    /// Telemetry provider for posture metrics
    Telemetry,
    /// Analytics pipeline for lifecycle events
    Analytics,
    /// Infrastructure backend applying remediation actions
    Infrastructure,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Anchor => "anchor",
            ServiceKind::Telemetry => "telemetry",
            ServiceKind::Analytics => "analytics",
            ServiceKind::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed call to an external collaborator, before retry handling.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for ServiceError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for ServiceError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

/// An external collaborator call that failed after all retry attempts.
///
/// This error is advisory: primary operations complete and surface it in
/// their receipts rather than propagating it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{service} service unavailable after {attempts} attempt(s): {reason}")]
pub struct ExternalServiceError {
    /// Which collaborator failed
    pub service: ServiceKind,
    /// Reason reported by the final attempt
    pub reason: String,
    /// Number of attempts made before giving up
    pub attempts: u32,
}

impl ExternalServiceError {
    pub fn new(service: ServiceKind, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            service,
            reason: reason.into(),
            attempts,
        }
    }
}
