//! Timestamp utilities
//!
//! All persisted timestamps use a fixed-width RFC 3339 form
//! (`2026-01-31T08:15:00.000Z`) so that SQLite string comparison and
//! `ORDER BY` agree with chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db).transpose()
}

/// Age of `then` relative to `now` in fractional days, never negative
pub fn age_in_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - then).num_milliseconds() as f64 / 1000.0;
    (seconds / 86_400.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_db_format_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + Duration::milliseconds(7);
        assert_eq!(to_db(a), "2026-01-02T03:04:05.000Z");
        assert_eq!(to_db(b), "2026-01-02T03:04:05.007Z");
        assert_eq!(to_db(a).len(), to_db(b).len());
    }

    #[test]
    fn test_db_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(from_db(&to_db(ts)).unwrap(), ts);
    }

    #[test]
    fn test_from_db_rejects_garbage() {
        assert!(from_db("yesterday").is_err());
    }

    #[test]
    fn test_age_in_days() {
        let then = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(age_in_days(then, then + Duration::days(10)), 10.0);
        assert_eq!(age_in_days(then, then + Duration::hours(12)), 0.5);
        // Future timestamps clamp to zero
        assert_eq!(age_in_days(then + Duration::days(1), then), 0.0);
    }

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01
    }
}
