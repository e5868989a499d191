use crate::error::{ArchiveError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

// `%#z` also takes `Z` and hour-only offsets such as `+02`.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M%#z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%MZ",
    "%Y-%m-%d %H:%MZ",
];

/// Calendar day used to partition local files, rendered as `yyyy-mm-dd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_epoch_millis(millis: i64) -> Result<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis)
            .map(|ts| Self(ts.date_naive()))
            .ok_or_else(|| ArchiveError::InvalidTimestamp {
                value: millis.to_string(),
            })
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Derives the day key from a publication timestamp, keeping the calendar
/// date the timestamp itself encodes (its own offset, never converted to UTC).
pub fn extract_day_key(time_published: &str) -> Result<DayKey> {
    let raw = time_published.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(DayKey(ts.date_naive()));
    }
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Ok(DayKey(ts.date_naive()));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(DayKey(ts.date()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, DAY_KEY_FORMAT) {
        return Ok(DayKey(date));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Ok(DayKey(ts.date_naive()));
    }

    Err(ArchiveError::InvalidTimestamp {
        value: time_published.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> String {
        extract_day_key(raw).unwrap().to_string()
    }

    #[test]
    fn sql_and_iso_forms_share_a_day_key() {
        assert_eq!(key("2023-11-28 12:00:00"), "2023-11-28");
        assert_eq!(key("2023-11-09T12:30:00Z"), "2023-11-09");
        assert_eq!(key("2023-11-09T12:30:00.123Z"), "2023-11-09");
        assert_eq!(key("2023-11-09T12:30:00"), "2023-11-09");
        assert_eq!(key("2023-11-09 12:30:00.250"), "2023-11-09");
        assert_eq!(key("2023-11-09"), "2023-11-09");
        assert_eq!(key("  2024-02-29 00:00:00  "), "2024-02-29");
    }

    #[test]
    fn keeps_the_encoded_offset_date() {
        // 04:30 UTC on the 29th, but the source says the 28th.
        assert_eq!(key("2023-11-28T23:30:00-05:00"), "2023-11-28");
        assert_eq!(key("2023-11-29T00:30:00+09:00"), "2023-11-29");
        assert_eq!(key("2023-11-28 23:30:00-05:00"), "2023-11-28");
        assert_eq!(key("2023-11-28 23:30:00 +0100"), "2023-11-28");
    }

    #[test]
    fn minute_precision_and_short_offsets() {
        assert_eq!(key("2023-11-28T12:00Z"), "2023-11-28");
        assert_eq!(key("2023-11-28 12:00Z"), "2023-11-28");
        assert_eq!(key("2023-11-28T12:00+02:00"), "2023-11-28");
        assert_eq!(key("2023-11-28 23:30-05:00"), "2023-11-28");
        assert_eq!(key("2023-11-28T12:00:00+02"), "2023-11-28");
        assert_eq!(key("2023-11-28T23:30:00.5-05"), "2023-11-28");
    }

    #[test]
    fn month_and_day_are_zero_padded() {
        assert_eq!(key("2015-01-05 08:00:00"), "2015-01-05");
        assert_eq!(key("Mon, 5 Jan 2015 08:00:00 +0000"), "2015-01-05");
    }

    #[test]
    fn rejects_unparseable_input() {
        for raw in ["not-a-date", "", "2023-13-01", "2023-02-30 10:00:00", "12:00:00"] {
            let err = extract_day_key(raw).unwrap_err();
            assert!(matches!(err, ArchiveError::InvalidTimestamp { .. }), "{raw}");
        }
    }

    #[test]
    fn epoch_millis_are_read_as_utc() {
        let day = DayKey::from_epoch_millis(1_701_216_001_000).unwrap();
        assert_eq!(day.to_string(), "2023-11-29");
    }
}
