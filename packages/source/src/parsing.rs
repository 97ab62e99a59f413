//! Shared parsing utilities for raw dataset values.
//!
//! Every function here is total: missing, empty, or unparseable input
//! yields `None` rather than an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use ticket_map_source_models::RawRecord;

/// Returns the value for `field`, treating JSON `null` as absent.
#[must_use]
pub fn get_value<'a>(record: &'a RawRecord, field: &str) -> Option<&'a serde_json::Value> {
    record.get(field).filter(|v| !v.is_null())
}

/// Returns the trimmed, non-empty text for `field`. Numbers are converted
/// to their decimal string (some datasets return numeric identifiers).
#[must_use]
pub fn get_text(record: &RawRecord, field: &str) -> Option<String> {
    match get_value(record, field)? {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses an integer from a JSON number or numeric string.
#[must_use]
pub fn parse_i32(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        serde_json::Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

/// Parses a finite float from a JSON number or numeric string.
#[must_use]
pub fn parse_f64(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Parses any supported date representation down to a plain calendar
/// date.
///
/// Accepts ISO dates (`2024-01-15`), Socrata floating timestamps
/// (`2024-01-15T00:00:00.000`), RFC 3339 timestamps, and US-style
/// `MM/DD/YYYY`.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(date);
    }
    parse_timestamp(s).map(|dt| dt.date_naive())
}

/// Parses a Socrata timestamp: RFC 3339 (system fields such as
/// `:updated_at`) or a floating timestamp with optional fractional
/// seconds, which is taken as UTC.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

/// Normalizes a violation time to `HH:MM` (24-hour).
///
/// Handles `0752A`, `08:41P`, and bare 24-hour `1345`/`13:45`. A 12-hour
/// value whose hour is outside `1..=12` is rejected.
#[must_use]
pub fn parse_violation_time(s: &str) -> Option<String> {
    let upper = s.trim().to_ascii_uppercase();
    let (digits, meridiem) = match upper.strip_suffix('A') {
        Some(rest) => (rest, Some(false)),
        None => match upper.strip_suffix('P') {
            Some(rest) => (rest, Some(true)),
            None => (upper.as_str(), None),
        },
    };

    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hour = digits[..2].parse::<u32>().ok()?;
    let minute = digits[2..].parse::<u32>().ok()?;

    let hour = match meridiem {
        None => hour,
        Some(_) if !(1..=12).contains(&hour) => return None,
        Some(false) => hour % 12,
        Some(true) => hour % 12 + 12,
    };

    NaiveTime::from_hms_opt(hour, minute, 0).map(|t| t.format("%H:%M").to_string())
}

/// Maps a county code as written on a ticket to its borough name.
///
/// Unknown codes return `None`.
#[must_use]
pub fn normalize_borough(code: &str) -> Option<&'static str> {
    match code.trim().to_ascii_uppercase().as_str() {
        "K" | "BK" | "KINGS" | "KING" => Some("Brooklyn"),
        "Q" | "QN" | "QNS" | "QUEEN" | "QUEENS" => Some("Queens"),
        "NY" | "MN" | "MAN" | "NEWY" | "NEW Y" | "MANHATTAN" => Some("Manhattan"),
        "BX" | "BRONX" => Some("Bronx"),
        "R" | "ST" | "RICH" | "RICHM" | "STATEN ISLAND" => Some("Staten Island"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: &serde_json::Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn get_text_trims_and_drops_empty() {
        let r = record(&json!({"a": "  hello ", "b": "   ", "c": 42, "d": null, "e": true}));
        assert_eq!(get_text(&r, "a").as_deref(), Some("hello"));
        assert_eq!(get_text(&r, "b"), None);
        assert_eq!(get_text(&r, "c").as_deref(), Some("42"));
        assert_eq!(get_text(&r, "d"), None);
        assert_eq!(get_text(&r, "e"), None);
        assert_eq!(get_text(&r, "missing"), None);
    }

    #[test]
    fn parses_numbers_leniently() {
        assert_eq!(parse_i32(&json!("14")), Some(14));
        assert_eq!(parse_i32(&json!(" 7 ")), Some(7));
        assert_eq!(parse_i32(&json!(21)), Some(21));
        assert_eq!(parse_i32(&json!("")), None);
        assert_eq!(parse_i32(&json!("abc")), None);
        assert_eq!(parse_i32(&json!(9_999_999_999_i64)), None);

        assert_eq!(parse_f64(&json!("65.00")), Some(65.0));
        assert_eq!(parse_f64(&json!(115)), Some(115.0));
        assert_eq!(parse_f64(&json!("NaN")), None);
        assert_eq!(parse_f64(&json!("n/a")), None);
        assert_eq!(parse_f64(&json!([1])), None);
    }

    #[test]
    fn parses_all_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("2024-01-15"), Some(expected));
        assert_eq!(parse_date("01/15/2024"), Some(expected));
        assert_eq!(parse_date("2024-01-15T00:00:00.000"), Some(expected));
        assert_eq!(parse_date("2024-01-15T23:10:00"), Some(expected));
        assert_eq!(parse_date("2024-01-15T14:30:00.000Z"), Some(expected));
    }

    #[test]
    fn rejects_invalid_dates() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("not-a-date"), None);
        assert_eq!(parse_date("13/45/2024"), None);
    }

    #[test]
    fn parses_socrata_timestamps() {
        let dt = parse_timestamp("2024-01-15T14:30:00.123Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T14:30:00.123+00:00");

        let dt = parse_timestamp("2024-01-15T14:30:00.000").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00 UTC");

        let dt = parse_timestamp("2024-01-15T14:30:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00 UTC");

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn normalizes_violation_times() {
        assert_eq!(parse_violation_time("0752A").as_deref(), Some("07:52"));
        assert_eq!(parse_violation_time("08:41P").as_deref(), Some("20:41"));
        assert_eq!(parse_violation_time("1200A").as_deref(), Some("00:00"));
        assert_eq!(parse_violation_time("1230P").as_deref(), Some("12:30"));
        assert_eq!(parse_violation_time("1345").as_deref(), Some("13:45"));
        assert_eq!(parse_violation_time("13:45").as_deref(), Some("13:45"));
    }

    #[test]
    fn rejects_malformed_violation_times() {
        assert_eq!(parse_violation_time(""), None);
        assert_eq!(parse_violation_time("1345P"), None);
        assert_eq!(parse_violation_time("0075A"), None);
        assert_eq!(parse_violation_time("7:5A"), None);
        assert_eq!(parse_violation_time("ABCDP"), None);
    }

    #[test]
    fn normalizes_borough_codes() {
        assert_eq!(normalize_borough("K"), Some("Brooklyn"));
        assert_eq!(normalize_borough("bk"), Some("Brooklyn"));
        assert_eq!(normalize_borough("NY"), Some("Manhattan"));
        assert_eq!(normalize_borough("QN"), Some("Queens"));
        assert_eq!(normalize_borough("BX"), Some("Bronx"));
        assert_eq!(normalize_borough("R"), Some("Staten Island"));
        assert_eq!(normalize_borough("XYZ"), None);
    }
}
