//! Timestamp and ID helpers shared across atelier crates.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Current wall-clock time in epoch milliseconds
pub fn timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current wall-clock time in epoch nanoseconds
pub fn timestamp_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Generate a unique ID with the given prefix
///
/// Combines the wall clock with a process-wide counter so that IDs
/// minted within the same millisecond stay distinct.
pub fn unique_id(prefix: &str) -> String {
    let count = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, timestamp_millis(), count)
}
