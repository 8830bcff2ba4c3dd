//! The untyped row model shared by repositories and backends.
//!
//! A [`Row`] is a bag of named [`Value`]s. Each entity describes its columns
//! once in a static [`Table`], and backends use that description to encode and
//! decode rows without knowing anything about the entity itself.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result, predicate::OrderBy};

// ─── Column names shared by every table ──────────────────────────────────────

pub const ID: &str = "id";
pub const PROJECT_ID: &str = "project_id";
pub const TRACE_ID: &str = "trace_id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
  Uuid(Uuid),
  Timestamp(DateTime<Utc>),
  /// An ordered list of strings (tags, file lists, trace id lists).
  List(Vec<String>),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  fn kind_name(&self) -> &'static str {
    match self {
      Self::Null => "null",
      Self::Bool(_) => "bool",
      Self::Int(_) => "int",
      Self::Float(_) => "float",
      Self::Text(_) => "text",
      Self::Uuid(_) => "uuid",
      Self::Timestamp(_) => "timestamp",
      Self::List(_) => "list",
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self { Self::Int(v.into()) }
}

impl From<u32> for Value {
  fn from(v: u32) -> Self { Self::Int(v.into()) }
}

/// Counters are stored as signed 64-bit integers. Values above `i64::MAX`
/// saturate to it; no token or duration count gets near that.
impl From<u64> for Value {
  fn from(v: u64) -> Self { Self::Int(i64::try_from(v).unwrap_or(i64::MAX)) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<&String> for Value {
  fn from(v: &String) -> Self { Self::Text(v.clone()) }
}

impl From<Uuid> for Value {
  fn from(v: Uuid) -> Self { Self::Uuid(v) }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self { Self::Timestamp(v) }
}

impl From<Vec<String>> for Value {
  fn from(v: Vec<String>) -> Self { Self::List(v) }
}

impl From<&[String]> for Value {
  fn from(v: &[String]) -> Self { Self::List(v.to_vec()) }
}

impl From<&serde_json::Value> for Value {
  /// JSON blobs are stored as their compact text form; JSON `null` is SQL
  /// `NULL`.
  fn from(v: &serde_json::Value) -> Self {
    match v {
      serde_json::Value::Null => Self::Null,
      other => Self::Text(other.to_string()),
    }
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}

// ─── Table descriptions ──────────────────────────────────────────────────────

/// Storage class of a column. Backends decode raw cells by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
  Text,
  Uuid,
  Int,
  Float,
  Bool,
  Timestamp,
  List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
  pub name: &'static str,
  pub kind: ColumnKind,
}

pub const fn col(name: &'static str, kind: ColumnKind) -> Column {
  Column { name, kind }
}

/// Static description of one versioned table.
///
/// Every table carries `id`, `project_id`, `created_at` and `updated_at`.
/// The latest row per `(project_id, id)` by `updated_at` is the live version.
#[derive(Debug)]
pub struct Table {
  pub name:          &'static str,
  /// Singular entity name used in error messages.
  pub entity:        &'static str,
  pub columns:       &'static [Column],
  /// Column referencing the owning trace, for child entities.
  pub trace_column:  Option<&'static str>,
  pub default_order: &'static [OrderBy],
  /// Columns a caller may order listings by.
  pub sortable:      &'static [&'static str],
}

impl Table {
  pub fn column(&self, name: &str) -> Option<&Column> {
    self.columns.iter().find(|c| c.name == name)
  }

  pub fn has_column(&self, name: &str) -> bool { self.column(name).is_some() }
}

impl PartialEq for Table {
  fn eq(&self, other: &Self) -> bool { self.name == other.name }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A set of named column values.
///
/// The typed accessors *take* the value out of the row, so a row is consumed
/// column by column while it is decoded into an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
  values: BTreeMap<String, Value>,
}

impl Row {
  pub fn new() -> Self { Self::default() }

  pub fn set(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
    self.values.insert(column.to_owned(), value.into());
    self
  }

  pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
    self.set(column, value);
    self
  }

  pub fn get(&self, column: &str) -> Option<&Value> { self.values.get(column) }

  pub fn len(&self) -> usize { self.values.len() }

  pub fn is_empty(&self) -> bool { self.values.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.values.iter().map(|(k, v)| (k.as_str(), v))
  }

  /// Remove and return a column; a missing column reads as `Null`.
  pub fn take(&mut self, column: &str) -> Value {
    self.values.remove(column).unwrap_or(Value::Null)
  }

  pub fn text(&mut self, column: &str) -> Result<String> {
    self
      .opt_text(column)?
      .ok_or_else(|| Error::decode(column, "unexpected null"))
  }

  pub fn opt_text(&mut self, column: &str) -> Result<Option<String>> {
    match self.take(column) {
      Value::Null => Ok(None),
      Value::Text(s) => Ok(Some(s)),
      other => Err(mismatch(column, "text", &other)),
    }
  }

  /// Text column that holds a `FromStr` enum discriminant.
  pub fn parse<T>(&mut self, column: &str) -> Result<T>
  where
    T: FromStr,
    T::Err: std::fmt::Display,
  {
    let raw = self.text(column)?;
    raw
      .parse()
      .map_err(|e| Error::decode(column, format!("{raw:?}: {e}")))
  }

  /// Text column that holds a JSON blob; `NULL` reads as JSON `null`.
  pub fn json(&mut self, column: &str) -> Result<serde_json::Value> {
    match self.opt_text(column)? {
      None => Ok(serde_json::Value::Null),
      Some(s) => serde_json::from_str(&s).map_err(|e| Error::decode(column, e)),
    }
  }

  pub fn uuid(&mut self, column: &str) -> Result<Uuid> {
    self
      .opt_uuid(column)?
      .ok_or_else(|| Error::decode(column, "unexpected null"))
  }

  pub fn opt_uuid(&mut self, column: &str) -> Result<Option<Uuid>> {
    match self.take(column) {
      Value::Null => Ok(None),
      Value::Uuid(u) => Ok(Some(u)),
      Value::Text(s) => Uuid::parse_str(&s)
        .map(Some)
        .map_err(|e| Error::decode(column, e)),
      other => Err(mismatch(column, "uuid", &other)),
    }
  }

  pub fn int(&mut self, column: &str) -> Result<i64> {
    self
      .opt_int(column)?
      .ok_or_else(|| Error::decode(column, "unexpected null"))
  }

  pub fn opt_int(&mut self, column: &str) -> Result<Option<i64>> {
    match self.take(column) {
      Value::Null => Ok(None),
      Value::Int(v) => Ok(Some(v)),
      Value::Bool(b) => Ok(Some(b.into())),
      other => Err(mismatch(column, "int", &other)),
    }
  }

  /// Non-negative integer column; `NULL` (e.g. an empty `SUM`) reads as 0.
  pub fn uint<T: TryFrom<i64>>(&mut self, column: &str) -> Result<T> {
    let v = self.opt_int(column)?.unwrap_or(0);
    T::try_from(v).map_err(|_| Error::decode(column, format!("{v} out of range")))
  }

  pub fn opt_uint<T: TryFrom<i64>>(&mut self, column: &str) -> Result<Option<T>> {
    self
      .opt_int(column)?
      .map(|v| {
        T::try_from(v)
          .map_err(|_| Error::decode(column, format!("{v} out of range")))
      })
      .transpose()
  }

  /// Float column; `NULL` reads as 0.
  pub fn float(&mut self, column: &str) -> Result<f64> {
    Ok(self.opt_float(column)?.unwrap_or(0.0))
  }

  pub fn opt_float(&mut self, column: &str) -> Result<Option<f64>> {
    match self.take(column) {
      Value::Null => Ok(None),
      Value::Float(v) => Ok(Some(v)),
      Value::Int(v) => Ok(Some(v as f64)),
      other => Err(mismatch(column, "float", &other)),
    }
  }

  pub fn bool(&mut self, column: &str) -> Result<bool> {
    match self.take(column) {
      Value::Null => Ok(false),
      Value::Bool(b) => Ok(b),
      Value::Int(v) => Ok(v != 0),
      other => Err(mismatch(column, "bool", &other)),
    }
  }

  pub fn timestamp(&mut self, column: &str) -> Result<DateTime<Utc>> {
    self
      .opt_timestamp(column)?
      .ok_or_else(|| Error::decode(column, "unexpected null"))
  }

  pub fn opt_timestamp(
    &mut self,
    column: &str,
  ) -> Result<Option<DateTime<Utc>>> {
    match self.take(column) {
      Value::Null => Ok(None),
      Value::Timestamp(t) => Ok(Some(t)),
      Value::Text(s) => DateTime::parse_from_rfc3339(&s)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| Error::decode(column, e)),
      other => Err(mismatch(column, "timestamp", &other)),
    }
  }

  /// List column; `NULL` reads as empty.
  pub fn list(&mut self, column: &str) -> Result<Vec<String>> {
    match self.take(column) {
      Value::Null => Ok(Vec::new()),
      Value::List(v) => Ok(v),
      other => Err(mismatch(column, "list", &other)),
    }
  }
}

impl FromIterator<(String, Value)> for Row {
  fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
    Self {
      values: iter.into_iter().collect(),
    }
  }
}

fn mismatch(column: &str, expected: &str, got: &Value) -> Error {
  Error::decode(column, format!("expected {expected}, got {}", got.kind_name()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn oversized_counters_saturate() {
    assert_eq!(Value::from(42u64), Value::Int(42));
    assert_eq!(Value::from(u64::MAX), Value::Int(i64::MAX));
  }

  #[test]
  fn take_consumes_the_column() {
    let mut row = Row::new().with("name", "alpha");
    assert_eq!(row.text("name").unwrap(), "alpha");
    assert!(row.is_empty());
    assert!(row.text("name").is_err());
  }

  #[test]
  fn missing_optional_columns_read_as_none() {
    let mut row = Row::new();
    assert_eq!(row.opt_text("x").unwrap(), None);
    assert_eq!(row.opt_timestamp("x").unwrap(), None);
    assert_eq!(row.list("x").unwrap(), Vec::<String>::new());
    assert_eq!(row.float("x").unwrap(), 0.0);
    assert_eq!(row.uint::<u64>("x").unwrap(), 0);
  }

  #[test]
  fn uint_rejects_negative() {
    let mut row = Row::new().with("n", -3i64);
    assert!(matches!(row.uint::<u32>("n"), Err(Error::Decode { .. })));
  }

  #[test]
  fn uuid_accepts_text() {
    let id = Uuid::new_v4();
    let mut row = Row::new().with("id", id.to_string());
    assert_eq!(row.uuid("id").unwrap(), id);
  }

  #[test]
  fn option_converts_to_null() {
    assert_eq!(Value::from(None::<String>), Value::Null);
    assert_eq!(Value::from(Some(3u32)), Value::Int(3));
    assert_eq!(Value::from(&serde_json::Value::Null), Value::Null);
  }

  #[test]
  fn type_mismatch_is_a_decode_error() {
    let mut row = Row::new().with("n", "seven");
    let err = row.int("n").unwrap_err();
    assert!(err.to_string().contains("expected int, got text"));
  }
}
