//! Utility functions for the matchmaking service

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Generate a new unique room ID
pub fn generate_room_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new claim token for a pairing attempt
pub fn generate_claim_token() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp `duration` after `from`, saturating on overflow
pub fn timestamp_after(from: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Timestamp `duration` before `from`, saturating on overflow
pub fn timestamp_before(from: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| from.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
