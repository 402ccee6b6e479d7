//! Date codec for the native boundary

use crate::error::HealthError;
use crate::types::truncate_to_second;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Local timestamp layout used by native result payloads
pub const NATIVE_LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Numeric epoch representation expected by a native store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateEncoding {
    EpochSeconds,
    EpochMillis,
}

impl DateEncoding {
    /// Whole-second instant as a native epoch number
    pub fn encode(&self, instant: DateTime<Utc>) -> i64 {
        let seconds = truncate_to_second(instant).timestamp();
        match self {
            DateEncoding::EpochSeconds => seconds,
            DateEncoding::EpochMillis => seconds * 1000,
        }
    }

    /// Parse a native date field.
    ///
    /// Accepts epoch numbers in this encoding, local `YYYY-MM-DD HH:MM:SS` strings (interpreted
    /// in `offset`) and RFC 3339 strings. Sub-second precision is always truncated, so decoding
    /// an already-normalized value returns it unchanged.
    pub fn decode(&self, value: &Value, offset: FixedOffset) -> Result<DateTime<Utc>, HealthError> {
        match value {
            Value::Number(n) => {
                let seconds = if let Some(whole) = n.as_i64() {
                    match self {
                        DateEncoding::EpochSeconds => whole,
                        DateEncoding::EpochMillis => whole.div_euclid(1000),
                    }
                } else {
                    let raw = n
                        .as_f64()
                        .ok_or_else(|| HealthError::InvalidResponse(format!("bad epoch {n}")))?;
                    let raw = match self {
                        DateEncoding::EpochSeconds => raw,
                        DateEncoding::EpochMillis => raw / 1000.0,
                    };
                    raw.floor() as i64
                };
                Utc.timestamp_opt(seconds, 0)
                    .single()
                    .ok_or_else(|| HealthError::InvalidResponse(format!("epoch out of range: {n}")))
            }
            Value::String(s) => decode_text(s, offset),
            other => Err(HealthError::InvalidResponse(format!(
                "expected a date, found {other}"
            ))),
        }
    }
}

fn decode_text(text: &str, offset: FixedOffset) -> Result<DateTime<Utc>, HealthError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(truncate_to_second(instant.with_timezone(&Utc)));
    }
    let naive = NaiveDateTime::parse_from_str(text, NATIVE_LOCAL_FORMAT)
        .map_err(|_| HealthError::InvalidResponse(format!("unparseable date {text}")))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| HealthError::InvalidResponse(format!("unparseable date {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_encode_truncates() {
        let instant = Utc.timestamp_opt(1_678_838_400, 750_000_000).unwrap();
        assert_eq!(DateEncoding::EpochSeconds.encode(instant), 1_678_838_400);
        assert_eq!(DateEncoding::EpochMillis.encode(instant), 1_678_838_400_000);
    }

    #[test]
    fn test_decode_millis_floors() {
        let decoded = DateEncoding::EpochMillis
            .decode(&json!(1_678_838_400_999_i64), utc())
            .unwrap();
        assert_eq!(decoded.timestamp(), 1_678_838_400);

        let decoded = DateEncoding::EpochSeconds.decode(&json!(12.9), utc()).unwrap();
        assert_eq!(decoded.timestamp(), 12);
    }

    #[test]
    fn test_decode_local_string_uses_offset() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let decoded = DateEncoding::EpochSeconds
            .decode(&json!("2023-03-15 10:00:00"), plus_two)
            .unwrap();
        assert_eq!(decoded, Utc.with_ymd_and_hms(2023, 3, 15, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_decode_is_idempotent() {
        let once = DateEncoding::EpochMillis
            .decode(&json!("2023-03-15T08:00:00.420Z"), utc())
            .unwrap();
        let twice = DateEncoding::EpochMillis
            .decode(&json!(once.to_rfc3339()), utc())
            .unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = DateEncoding::EpochSeconds
            .decode(&json!("yesterday"), utc())
            .unwrap_err();
        assert!(matches!(err, HealthError::InvalidResponse(_)));
        assert!(DateEncoding::EpochSeconds.decode(&json!(null), utc()).is_err());
    }
}
