//! Column conversion helpers shared by the row mappers.

use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Logical clocks are `u64` in memory and `INTEGER` (i64) in SQLite.
pub(crate) fn clock(v: u64) -> i64 {
    v as i64
}

pub(crate) fn get_clock(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    Ok(v as u64)
}

pub(crate) fn get_bool(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    let v: i64 = row.get(idx)?;
    Ok(v != 0)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string(value)
}

pub(crate) fn get_json<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Integer,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}
