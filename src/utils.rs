//! Utility functions for the ticket client

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Generate a new unique search ID
pub fn generate_search_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a protobuf timestamp, falling back to now for missing or invalid values
pub fn timestamp_from_proto(ts: Option<&prost_types::Timestamp>) -> DateTime<Utc> {
    ts.and_then(|ts| Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32).single())
        .unwrap_or_else(current_timestamp)
}

/// Split `host:port` into its parts. The port is `None` when absent or not numeric.
pub fn split_connection(connection: &str) -> (&str, Option<u16>) {
    match connection.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (connection, None),
        },
        None => (connection, None),
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
