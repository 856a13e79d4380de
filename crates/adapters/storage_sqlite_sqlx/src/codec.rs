//! Column encodings shared by the stores.
//!
//! Timestamps are RFC 3339 UTC strings with a fixed nanosecond fraction, so
//! lexical order in SQL matches chronological order. Nested domain values
//! live in JSON text columns.

use std::str::FromStr;

use chrono::SecondsFormat;
use serde::Serialize;
use serde::de::DeserializeOwned;

use autoedge_domain::time::Timestamp;

use crate::error::StorageError;

pub(crate) fn timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<Timestamp, sqlx::Error> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.to_utc())
        .map_err(decode_error)
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<Timestamp>, sqlx::Error> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(value: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(value).map_err(decode_error)
}

pub(crate) fn parse<T>(value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(decode_error)
}

/// SQLite integers are signed; values past `i64::MAX` are clamped.
pub(crate) fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_int<T: TryFrom<i64>>(value: i64) -> Result<T, sqlx::Error>
where
    T::Error: std::error::Error + Send + Sync + 'static,
{
    T::try_from(value).map_err(decode_error)
}

fn decode_error(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}
