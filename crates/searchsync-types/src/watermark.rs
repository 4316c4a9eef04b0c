//! Watermark types for incremental sync position tracking.
//!
//! A watermark marks the highest cursor value already mirrored for an
//! entity, so that the next extract only asks the source for newer rows.
//! Checkpoint stores persist watermarks as plain strings; this module owns
//! the typed view, parsing, and ordering.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::CursorKind;

/// `0001-01-01T00:00:00Z`, the lowest timestamp both chrono and `PostgreSQL`
/// accept, used as the "never synced" timestamp cursor.
const MIN_TIMESTAMP_SECS: i64 = -62_135_596_800;

/// Errors raised while reading a watermark from text or a row value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatermarkError {
    /// The raw value could not be parsed as the expected cursor kind.
    #[error("invalid {kind} cursor value '{raw}': {reason}")]
    Invalid {
        kind: CursorKind,
        raw: String,
        reason: String,
    },
    /// The row had no usable value for the cursor field.
    #[error("cursor field '{field}' is missing or null")]
    Missing { field: String },
}

/// Typed cursor position.
///
/// Each variant carries its value in a named `value` field for clean JSON
/// serialization: `{"type": "int64", "value": 42}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Watermark {
    /// UUID position.
    Uuid { value: Uuid },
    /// Last-modified timestamp position.
    Timestamp { value: DateTime<Utc> },
    /// Integer identifier position.
    Int64 { value: i64 },
}

impl Watermark {
    /// The lowest position for a cursor kind: what an absent checkpoint means.
    #[must_use]
    pub fn minimum(kind: CursorKind) -> Self {
        match kind {
            CursorKind::Uuid => Self::Uuid { value: Uuid::nil() },
            CursorKind::Timestamp => Self::Timestamp {
                value: DateTime::<Utc>::from_timestamp(MIN_TIMESTAMP_SECS, 0)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            },
            CursorKind::Int64 => Self::Int64 { value: i64::MIN },
        }
    }

    /// Cursor kind of this value.
    #[must_use]
    pub fn kind(&self) -> CursorKind {
        match self {
            Self::Uuid { .. } => CursorKind::Uuid,
            Self::Timestamp { .. } => CursorKind::Timestamp,
            Self::Int64 { .. } => CursorKind::Int64,
        }
    }

    /// Whether this is the "never synced" position.
    #[must_use]
    pub fn is_minimum(&self) -> bool {
        *self == Self::minimum(self.kind())
    }

    /// Parse a string-encoded cursor of the given kind.
    ///
    /// Timestamps accept RFC 3339 as well as the `PostgreSQL` text forms
    /// `2021-06-16 20:14:09.22+00` and `2021-06-16 20:14:09` (read as UTC).
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::Invalid`] when `raw` does not parse.
    pub fn parse(kind: CursorKind, raw: &str) -> Result<Self, WatermarkError> {
        let trimmed = raw.trim();
        let invalid = |reason: String| WatermarkError::Invalid {
            kind,
            raw: raw.to_string(),
            reason,
        };
        match kind {
            CursorKind::Uuid => Uuid::parse_str(trimmed)
                .map(|value| Self::Uuid { value })
                .map_err(|e| invalid(e.to_string())),
            CursorKind::Int64 => trimmed
                .parse::<i64>()
                .map(|value| Self::Int64 { value })
                .map_err(|e| invalid(e.to_string())),
            CursorKind::Timestamp => parse_timestamp(trimmed)
                .map(|value| Self::Timestamp { value })
                .ok_or_else(|| invalid("unrecognized timestamp format".to_string())),
        }
    }

    /// Read a cursor from a JSON row value (string or integer).
    ///
    /// # Errors
    ///
    /// Returns [`WatermarkError::Missing`] for null and
    /// [`WatermarkError::Invalid`] for values of the wrong shape.
    pub fn from_json(
        kind: CursorKind,
        field: &str,
        value: Option<&serde_json::Value>,
    ) -> Result<Self, WatermarkError> {
        match value {
            None | Some(serde_json::Value::Null) => Err(WatermarkError::Missing {
                field: field.to_string(),
            }),
            Some(serde_json::Value::String(s)) => Self::parse(kind, s),
            Some(serde_json::Value::Number(n)) if kind == CursorKind::Int64 => n
                .as_i64()
                .map(|value| Self::Int64 { value })
                .ok_or_else(|| WatermarkError::Invalid {
                    kind,
                    raw: n.to_string(),
                    reason: "not a 64-bit integer".to_string(),
                }),
            Some(other) => Err(WatermarkError::Invalid {
                kind,
                raw: other.to_string(),
                reason: "unexpected JSON type".to_string(),
            }),
        }
    }

    /// String form written to the checkpoint store and bound into queries.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Uuid { value } => value.hyphenated().to_string(),
            Self::Timestamp { value } => value.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Self::Int64 { value } => value.to_string(),
        }
    }

    /// Order two watermarks of the same kind. Different kinds don't compare.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Uuid { value: a }, Self::Uuid { value: b }) => Some(a.cmp(b)),
            (Self::Timestamp { value: a }, Self::Timestamp { value: b }) => Some(a.cmp(b)),
            (Self::Int64 { value: a }, Self::Int64 { value: b }) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|ndt| ndt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_uuid_is_nil() {
        let wm = Watermark::minimum(CursorKind::Uuid);
        assert_eq!(wm.encode(), "00000000-0000-0000-0000-000000000000");
        assert!(wm.is_minimum());
    }

    #[test]
    fn minimum_timestamp_is_year_one() {
        let wm = Watermark::minimum(CursorKind::Timestamp);
        assert_eq!(wm.encode(), "0001-01-01T00:00:00Z");
        assert!(wm.is_minimum());
    }

    #[test]
    fn parse_postgres_timestamp_with_short_offset() {
        let wm = Watermark::parse(CursorKind::Timestamp, "2021-06-16 20:14:09.221855+00").unwrap();
        assert_eq!(wm.encode(), "2021-06-16T20:14:09.221855Z");
    }

    #[test]
    fn parse_naive_timestamp_reads_as_utc() {
        let wm = Watermark::parse(CursorKind::Timestamp, "2021-06-16 20:14:09").unwrap();
        assert_eq!(wm.encode(), "2021-06-16T20:14:09Z");
    }

    #[test]
    fn encode_then_parse_keeps_microseconds() {
        let wm = Watermark::parse(CursorKind::Timestamp, "2024-01-15T10:30:00.000123Z").unwrap();
        let back = Watermark::parse(CursorKind::Timestamp, &wm.encode()).unwrap();
        assert_eq!(wm, back);
    }

    #[test]
    fn parse_invalid_uuid_reports_kind_and_raw() {
        let err = Watermark::parse(CursorKind::Uuid, "not-a-uuid").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("uuid"), "got: {msg}");
        assert!(msg.contains("not-a-uuid"), "got: {msg}");
    }

    #[test]
    fn from_json_accepts_integer_numbers() {
        let value = serde_json::json!(42);
        let wm = Watermark::from_json(CursorKind::Int64, "id", Some(&value)).unwrap();
        assert_eq!(wm, Watermark::Int64 { value: 42 });
    }

    #[test]
    fn from_json_null_is_missing() {
        let err =
            Watermark::from_json(CursorKind::Timestamp, "modified", Some(&serde_json::Value::Null))
                .unwrap_err();
        assert_eq!(
            err,
            WatermarkError::Missing {
                field: "modified".into()
            }
        );
    }

    #[test]
    fn uuid_ordering_is_bytewise() {
        let a = Watermark::parse(CursorKind::Uuid, "00000000-0000-0000-0000-00000000000a").unwrap();
        let b = Watermark::parse(CursorKind::Uuid, "00000000-0000-0000-0000-0000000000b0").unwrap();
        assert_eq!(a.compare(&b), Some(Ordering::Less));
    }

    #[test]
    fn different_kinds_do_not_compare() {
        let a = Watermark::minimum(CursorKind::Uuid);
        let b = Watermark::minimum(CursorKind::Int64);
        assert_eq!(a.compare(&b), None);
    }

    #[test]
    fn json_format_is_tagged() {
        let wm = Watermark::Int64 { value: 7 };
        let json = serde_json::to_value(&wm).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int64", "value": 7}));
    }
}
