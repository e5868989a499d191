use crate::day_key::{extract_day_key, DayKey};
use crate::error::{ArchiveError, Result};
use serde_json::Value as JsonValue;

pub const TIME_PUBLISHED_FIELD: &str = "timePublished";

#[derive(Debug, Clone, PartialEq)]
pub enum TimePublished {
    Text(String),
    EpochMillis(i64),
}

/// One decoded message: the line written to the day file plus the
/// publication time that decides which day file it goes to.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    line: String,
    time_published: TimePublished,
}

impl Record {
    /// Decodes a raw transport payload. The text is kept as sent; a payload
    /// spanning lines is joined onto one line (JSON tokens never contain a
    /// line break, so only whitespace is dropped).
    pub fn from_json_slice(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| ArchiveError::invalid_record("payload is not valid UTF-8"))?
            .trim();
        let value: JsonValue = serde_json::from_str(text)
            .map_err(|err| ArchiveError::invalid_record(format!("payload is not JSON: {err}")))?;
        let time_published = time_published_of(&value)?;
        let line = if text.contains(['\n', '\r']) {
            text.split(['\n', '\r']).map(str::trim).collect::<String>()
        } else {
            text.to_string()
        };
        Ok(Self {
            line,
            time_published,
        })
    }

    /// Builds a record from an already-parsed value; the line is the compact
    /// serialization of `value`.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let time_published = time_published_of(&value)?;
        Ok(Self {
            line: value.to_string(),
            time_published,
        })
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn time_published(&self) -> &TimePublished {
        &self.time_published
    }

    pub fn day_key(&self) -> Result<DayKey> {
        match &self.time_published {
            TimePublished::Text(raw) => extract_day_key(raw),
            TimePublished::EpochMillis(millis) => DayKey::from_epoch_millis(*millis),
        }
    }
}

fn time_published_of(value: &JsonValue) -> Result<TimePublished> {
    let JsonValue::Object(fields) = value else {
        return Err(ArchiveError::invalid_record("payload is not a JSON object"));
    };
    match fields.get(TIME_PUBLISHED_FIELD) {
        Some(JsonValue::String(raw)) => Ok(TimePublished::Text(raw.clone())),
        Some(JsonValue::Number(num)) => num
            .as_i64()
            .map(TimePublished::EpochMillis)
            .ok_or_else(|| ArchiveError::InvalidTimestamp {
                value: num.to_string(),
            }),
        Some(other) => Err(ArchiveError::InvalidTimestamp {
            value: other.to_string(),
        }),
        None => Err(ArchiveError::invalid_record(format!(
            "missing {TIME_PUBLISHED_FIELD}"
        ))),
    }
}
