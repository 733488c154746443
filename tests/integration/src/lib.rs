//! Integration tests spanning the CapsuleCore workspace
//!
//! This test suite validates:
//! - Capsule lifecycle end to end against SQLite storage
//! - Audit journal continuity across process restarts
//! - The posture pipeline from telemetry intake to dispatched remediation
//! - Event delivery to the analytics sink across registry and posture ops

pub mod test_utils;

#[cfg(test)]
mod capsule_lifecycle_tests;

#[cfg(test)]
mod posture_pipeline_tests;
