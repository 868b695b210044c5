//! Timestamp columns.
//!
//! Written as UTC `YYYY-MM-DD HH:MM:SS[.fffffffff]`, the shape produced by
//! `CURRENT_TIMESTAMP`, so explicit and defaulted values sort together.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{Type, ValueRef};
use rusqlite::Row;

const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, thiserror::Error)]
#[error("unrecognised timestamp '{0}'")]
pub(crate) struct TimestampError(String);

pub(crate) fn to_sql(ts: &DateTime<Utc>) -> String {
    ts.format(STORAGE_FORMAT).to_string()
}

pub(crate) fn parse(text: &str) -> Result<DateTime<Utc>, TimestampError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, STORAGE_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Offset-qualified values written by other tools
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_go_time(text) {
        return Ok(dt);
    }
    Err(TimestampError(text.to_string()))
}

/// Go's `time.Time.String()` shape, e.g. `2023-06-01 12:30:45 -0700 PDT`,
/// optionally followed by a monotonic clock reading (`m=+0.0012`).
fn parse_go_time(text: &str) -> Option<DateTime<Utc>> {
    let text = match text.find(" m=") {
        Some(pos) => &text[..pos],
        None => text,
    };
    let mut parts = text.split_whitespace();
    let (date, time, offset) = (parts.next()?, parts.next()?, parts.next()?);
    // The zone abbreviation is informational; the numeric offset is authoritative
    if parts.nth(1).is_some() {
        return None;
    }
    DateTime::parse_from_str(&format!("{date} {time} {offset}"), "%Y-%m-%d %H:%M:%S%.f %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read a nullable timestamp column (text, or integer Unix seconds).
pub(crate) fn column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })?;
            parse(text).map(Some).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        }
        ValueRef::Integer(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs)),
        other => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "timestamp".to_string(),
            other.data_type(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_subseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 1).unwrap()
            + chrono::Duration::milliseconds(250);
        let text = to_sql(&ts);
        assert!(text.starts_with("2024-05-17 08:30:01.25"));
        assert_eq!(parse(&text).unwrap(), ts);
    }

    #[test]
    fn test_parses_current_timestamp_and_foreign_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 1).unwrap();
        assert_eq!(parse("2024-05-17 08:30:01").unwrap(), expected);
        assert_eq!(parse("2024-05-17T08:30:01Z").unwrap(), expected);
        assert_eq!(parse("2024-05-17 10:30:01+02:00").unwrap(), expected);
        assert!(parse("yesterday").is_err());
    }

    #[test]
    fn test_parses_go_time_strings() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 12, 30, 45).unwrap();
        assert_eq!(parse("2023-06-01 12:30:45 +0000 UTC").unwrap(), expected);
        assert_eq!(parse("2023-06-01 05:30:45 -0700 PDT").unwrap(), expected);
        assert_eq!(
            parse("2023-06-01 12:30:45.5 +0000 UTC m=+0.001234567").unwrap(),
            expected + chrono::Duration::milliseconds(500)
        );
        assert!(parse("2023-06-01 12:30:45 +0000 UTC extra").is_err());
        assert!(parse("2023-06-01 12:30:45 PDT").is_err());
    }

    #[test]
    fn test_orders_lexicographically() {
        let a = to_sql(&Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        let b = to_sql(&(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
            + chrono::Duration::milliseconds(1)));
        let c = "2024-01-01 09:00:01".to_string();
        assert!(a < b && b < c);
    }
}
