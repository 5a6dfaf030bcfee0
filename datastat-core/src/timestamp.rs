//! Acquisition timestamp parsing
//!
//! `date_acquisition` arrives in several shapes depending on who wrote the
//! collection: plain dates (`2024-03-01`), naive date-times, RFC 3339 strings,
//! extended JSON (`{"$date": ...}`) or epoch milliseconds. All of them are
//! normalised to UTC here so that spans are computed the same way whatever
//! the source format.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Milliseconds in one day, used to turn timestamp differences into days.
pub const MILLIS_PER_DAY: f64 = 86_400_000.0;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a timestamp value. Returns `None` when the value is missing,
/// `null`, or not recognisable as a point in time.
///
/// ```
/// use serde_json::json;
/// use datastat_core::timestamp::parse_timestamp;
///
/// let a = parse_timestamp(&json!("2024-01-01")).unwrap();
/// let b = parse_timestamp(&json!("2024-01-01T00:00:00Z")).unwrap();
/// assert_eq!(a, b);
/// assert!(parse_timestamp(&json!("yesterday")).is_none());
/// ```
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(map) => map.get("$date").and_then(parse_timestamp),
        _ => None,
    }
}

/// Parse a timestamp string (see [`parse_timestamp`]).
pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse a timestamp into Unix epoch milliseconds.
pub fn to_epoch_millis(value: &Value) -> Option<i64> {
    parse_timestamp(value).map(|dt| dt.timestamp_millis())
}

/// Difference between two epoch-millisecond instants, in days.
#[inline]
pub fn millis_to_days(millis: i64) -> f64 {
    millis as f64 / MILLIS_PER_DAY
}
