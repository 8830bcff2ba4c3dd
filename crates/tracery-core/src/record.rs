//! The [`Record`] and [`Filter`] traits tying entities to their tables.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Result,
  predicate::{OrderBy, Predicate},
  row::{Row, Table, Value},
};

/// An entity stored as versioned rows in one [`Table`].
///
/// Identity is `(project_id, id)`. Writing a record with an existing identity
/// and a newer `updated_at` replaces it for all readers.
pub trait Record: Sized + Send + Sync + 'static {
  type Id: Clone + Display + Into<Value> + Send + Sync + 'static;

  const TABLE: &'static Table;

  fn id(&self) -> Self::Id;

  fn project_id(&self) -> Uuid;

  /// Stamp a new version.
  fn touch(&mut self, now: DateTime<Utc>);

  /// The version column.
  fn updated_at(&self) -> DateTime<Utc>;

  /// Reject values the store would refuse or could not read back.
  fn validate(&self) -> Result<()> { Ok(()) }

  fn to_row(&self) -> Row;

  fn from_row(row: Row) -> Result<Self>;
}

/// Caller-facing listing criteria for one entity.
pub trait Filter {
  type Record: Record;

  /// Build the tenant-scoped predicate. Fails on a nil project.
  fn predicate(&self) -> Result<Predicate>;

  /// Ordering for listings; defaults to the table's natural order.
  fn order(&self) -> Vec<OrderBy> {
    <Self::Record as Record>::TABLE.default_order.to_vec()
  }
}
