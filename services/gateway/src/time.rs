//! Wall-clock helpers. Everything in the core carries instants as seconds
//! since the Unix epoch (fractional), matching the wire format.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock instant as fractional epoch seconds.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Parse an ISO-8601 timestamp (as MQTT and WebSocket payloads carry) into
/// epoch seconds.
pub fn parse_iso8601(s: &str) -> Option<f64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9)
}
