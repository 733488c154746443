//! Shared clock helpers.
//!
//! All persisted timestamps in CapsuleCore are Unix epoch milliseconds stored
//! as `u64`, matching the journal and registry schemas.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as Unix epoch milliseconds.
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_millis() as u64
}
