//! Wall-clock helpers.
//!
//! Task records carry millisecond timestamps so they survive serialization
//! and process restarts unchanged.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Add a duration to a millisecond timestamp.
#[must_use]
pub fn after_ms(base_ms: u128, delay: Duration) -> u128 {
    base_ms.saturating_add(delay.as_millis())
}
