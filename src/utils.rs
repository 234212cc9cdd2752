//! Utility functions for the matchmaking service

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Current time in Unix milliseconds, the unit stored in room key records
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Random startup delay in `[0, period)` so workers started together spread out
pub fn initial_jitter(period: Duration) -> Duration {
    let period_ms = period.as_millis() as u64;
    if period_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..period_ms))
}

/// Fair coin used to decide credential order
pub fn coin_flip() -> bool {
    rand::rng().random_bool(0.5)
}
