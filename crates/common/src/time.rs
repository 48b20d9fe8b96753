//! Epoch-millisecond parsing and the human datetime format used in messages
//! and checkpoints.

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use serde_json::Value;

/// `DD.MM.YYYY HH:mm:ss`
pub const DATETIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Offset of the local timezone right now.
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse an epoch-ms value that the tracker may send as a string or a number.
pub fn parse_epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

/// Format epoch milliseconds as `DD.MM.YYYY HH:mm:ss` in the given offset.
pub fn format_epoch_ms(ms: i64, offset: &FixedOffset) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(utc) => offset
            .from_utc_datetime(&utc.naive_utc())
            .format(DATETIME_FORMAT)
            .to_string(),
        None => String::new(),
    }
}
