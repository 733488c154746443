//! Core functionality for the CapsuleCore capsule management system.
//!
//! This crate provides the fundamental types, traits, and utilities used
//! across the CapsuleCore ecosystem: the shared event schema, the retry
//! policy for external collaborator calls, and logging setup.

pub mod error;
pub mod event;
pub mod logging;
pub mod retry;
pub mod time;

pub use error::{ExternalServiceError, ServiceError, ServiceKind};
pub use event::{
    AnalyticsSink, Event, EventBuilder, EventCategory, EventMetadata, EventSeverity, LogAnalytics,
    MemoryAnalytics,
};
pub use retry::{Backoff, RetryPolicy};
pub use time::unix_timestamp_ms;
