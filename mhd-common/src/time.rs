//! Timestamp utilities
//!
//! All timestamps are stored as RFC 3339 UTC strings with millisecond
//! precision so that lexical order matches chronological order and equal
//! instants always produce identical keys.

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Canonical storage form of a timestamp
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored or user-supplied RFC 3339 timestamp
pub fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Midnight UTC of the given calendar date
pub fn date_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Midnight UTC of the day containing `ts`
pub fn day_start(ts: &DateTime<Utc>) -> DateTime<Utc> {
    date_start(ts.date_naive())
}

/// Timestamp `days` days after `ts` (negative moves backwards)
pub fn add_days(ts: &DateTime<Utc>, days: i64) -> DateTime<Utc> {
    *ts + Duration::days(days)
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("Invalid date '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // After 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_format_and_parse_agree() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 30, 0).unwrap();
        let text = format_ts(&ts);
        assert_eq!(text, "2024-03-09T07:30:00.000Z");
        assert_eq!(parse_ts(&text).unwrap(), ts);
    }

    #[test]
    fn test_parse_accepts_offsets() {
        let parsed = parse_ts("2024-03-09T09:30:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 9, 7, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_ts("yesterday"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_day_start_truncates() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(
            day_start(&ts),
            Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(format_ts(&a) < format_ts(&b));
    }

    #[test]
    fn test_add_days_crosses_month() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 30, 0, 0, 0).unwrap();
        assert_eq!(
            add_days(&ts, 3),
            Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap()
        );
    }
}
