//! Conversion between core [`Value`]s and SQLite storage classes.
//!
//! Timestamps are fixed-width RFC 3339 with nanoseconds and a `Z` suffix, so
//! text order is time order. UUIDs are hyphenated lowercase. Booleans are
//! `0`/`1`. Lists are JSON arrays of strings.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use tracery_core::row::{ColumnKind, Value};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

/// Lists are written as string arrays, but aggregated lists may carry
/// numbers; those are kept in their JSON spelling.
pub fn decode_list(s: &str) -> Result<Vec<String>> {
  let items: Vec<serde_json::Value> = serde_json::from_str(s)?;
  Ok(
    items
      .into_iter()
      .filter(|v| !v.is_null())
      .map(|v| match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
      })
      .collect(),
  )
}

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn to_sql(value: &Value) -> Result<SqlValue> {
  Ok(match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Int(i) => SqlValue::Integer(*i),
    Value::Float(f) => SqlValue::Real(*f),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Uuid(u) => SqlValue::Text(encode_uuid(*u)),
    Value::Timestamp(dt) => SqlValue::Text(encode_dt(*dt)),
    Value::List(items) => SqlValue::Text(serde_json::to_string(items)?),
  })
}

pub fn from_sql(column: &str, kind: ColumnKind, raw: SqlValue) -> Result<Value> {
  use ColumnKind as K;
  Ok(match (kind, raw) {
    (_, SqlValue::Null) => Value::Null,
    (K::Text, SqlValue::Text(s)) => Value::Text(s),
    (K::Text, SqlValue::Integer(i)) => Value::Text(i.to_string()),
    (K::Text, SqlValue::Real(f)) => Value::Text(f.to_string()),
    (K::Uuid, SqlValue::Text(s)) => Value::Uuid(decode_uuid(&s)?),
    (K::Int, SqlValue::Integer(i)) => Value::Int(i),
    (K::Int, SqlValue::Real(f)) => Value::Int(f as i64),
    (K::Float, SqlValue::Real(f)) => Value::Float(f),
    (K::Float, SqlValue::Integer(i)) => Value::Float(i as f64),
    (K::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
    (K::Timestamp, SqlValue::Text(s)) => Value::Timestamp(decode_dt(&s)?),
    (K::List, SqlValue::Text(s)) => Value::List(decode_list(&s)?),
    (kind, other) => {
      return Err(Error::Unexpected {
        column:   column.to_owned(),
        expected: sql_type(kind),
        found:    other.data_type().to_string(),
      });
    }
  })
}

/// Declared SQLite type for a column kind.
pub fn sql_type(kind: ColumnKind) -> &'static str {
  match kind {
    ColumnKind::Int | ColumnKind::Bool => "INTEGER",
    ColumnKind::Float => "REAL",
    ColumnKind::Text
    | ColumnKind::Uuid
    | ColumnKind::Timestamp
    | ColumnKind::List => "TEXT",
  }
}
