//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Unix seconds as stored in `last_used_timestamp`
pub fn unix_seconds(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// Human-readable date stored in `last_used_date`
pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// Render a stored unix timestamp for operator output (0 = never)
pub fn describe_unix_seconds(ts: i64) -> String {
    if ts <= 0 {
        return "never".to_string();
    }
    match Utc.timestamp_opt(ts, 0).single() {
        Some(at) => at.to_rfc3339(),
        None => format!("invalid timestamp {}", ts),
    }
}
