//! Attribute value helpers.
//!
//! Attribute values arrive as JSON from systems of record that do not agree on
//! types (`"5"` vs `5`, dates vs timestamps). These helpers give every
//! evaluator the same comparison semantics.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value;

/// Render a value without JSON quoting. `null` renders as the empty string.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON equality, falling back to comparing stringified forms.
///
/// `null` only equals `null`.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if a.is_null() || b.is_null() {
        return false;
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    stringify(a) == stringify(b)
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp into a calendar date.
#[must_use]
pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

/// Calendar date carried by a JSON value, if any.
#[must_use]
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date_str)
}

/// Instant carried by a JSON value. Plain dates map to midnight UTC.
#[must_use]
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// Numeric value of a JSON number or numeric string.
#[must_use]
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Order two values: numerically when both are numbers, else as dates when both
/// are dates, else lexically. `None` when either side is null.
#[must_use]
pub fn compare_ordered(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (parse_date(a), parse_date(b)) {
        return Some(x.cmp(&y));
    }
    Some(stringify(a).cmp(&stringify(b)))
}
