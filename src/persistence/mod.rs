//! Persistence layer modules.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::{AppError, Result};

pub mod db;
pub mod entity_repo;
pub mod ledger_repo;
pub mod schema;
pub mod store;

/// Canonical stored form of a timestamp.
///
/// Fixed precision keeps `julianday()` comparisons and lexical ordering
/// consistent across writers.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

/// Offset-less layouts `SQLite` date functions accept; read as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Lenient read of a `created_at` written by any tool.
///
/// Accepts RFC 3339, then the offset-less forms `julianday()` understands
/// (including `CURRENT_TIMESTAMP` output) as UTC.
fn parse_stored_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}
