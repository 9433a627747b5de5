//! Timestamp normalization at the storage seam.
//!
//! Stored documents carry timestamps in several shapes depending on who
//! wrote them:
//!
//! ```text
//! 1718000000123                         raw milliseconds
//! "1718000000123"                       numeric string
//! "2024-06-10T06:13:20.123Z"            RFC 3339
//! {"seconds": 1718000000, "nanoseconds": 123000000}
//! {"_seconds": 1718000000, "_nanoseconds": 123000000}
//! {"$date": <any of the above>}
//! {".sv": "timestamp"}                  unresolved server sentinel
//! ```
//!
//! Everything collapses to `u64` milliseconds. Unresolvable values
//! (negative numbers, sentinels, garbage) yield `None` and the caller
//! substitutes its own default.

use chrono::DateTime;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Normalize any supported timestamp representation to epoch milliseconds.
pub fn normalize(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else {
                n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)
            }
        }
        Value::String(s) => parse_str(s),
        Value::Object(map) => {
            if let Some(inner) = map.get("$date") {
                return normalize(inner);
            }
            if map.contains_key(".sv") {
                return None;
            }
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let seconds = seconds.as_u64().or_else(|| {
                seconds.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)
            })?;
            Some(seconds.saturating_mul(1000).saturating_add(nanos / 1_000_000))
        }
        _ => None,
    }
}

fn parse_str(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<u64>() {
        return Some(n);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
