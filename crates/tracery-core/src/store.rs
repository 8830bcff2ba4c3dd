//! The [`RowStore`] trait: the versioned row store every repository sits on.
//!
//! Implemented by storage backends (e.g. `tracery-store-sqlite`). All reads
//! see only the live version of each `(project_id, id)`; superseded versions
//! may still exist physically until compaction.

use std::future::Future;

use crate::{
  Result,
  predicate::{GroupQuery, Predicate, Select},
  row::{Row, Table},
};

/// Abstraction over a versioned, append-only row store.
///
/// Deletes are mutations the backend may apply asynchronously; a caller that
/// needs the outcome re-queries. All methods return `Send` futures.
pub trait RowStore: Send + Sync {
  /// Append one row.
  fn insert(
    &self,
    table: &'static Table,
    row: Row,
  ) -> impl Future<Output = Result<()>> + Send + '_;

  /// Append rows as one unit: all become visible or none do.
  fn insert_batch(
    &self,
    table: &'static Table,
    rows: Vec<Row>,
  ) -> impl Future<Output = Result<()>> + Send + '_;

  /// At most one live row. A predicate on `(project_id, id)` selects exactly
  /// one identity.
  fn query_one(
    &self,
    table: &'static Table,
    predicate: Predicate,
  ) -> impl Future<Output = Result<Option<Row>>> + Send + '_;

  fn query_many(
    &self,
    table: &'static Table,
    select: Select,
  ) -> impl Future<Output = Result<Vec<Row>>> + Send + '_;

  /// Number of live rows matching the predicate.
  fn count(
    &self,
    table: &'static Table,
    predicate: Predicate,
  ) -> impl Future<Output = Result<u64>> + Send + '_;

  /// Grouped aggregation. With no grouping columns the result is exactly one
  /// row, even over an empty input.
  fn aggregate(
    &self,
    table: &'static Table,
    query: GroupQuery,
  ) -> impl Future<Output = Result<Vec<Row>>> + Send + '_;

  /// Remove every physical version of the rows matching the predicate.
  fn delete_where(
    &self,
    table: &'static Table,
    predicate: Predicate,
  ) -> impl Future<Output = Result<()>> + Send + '_;
}
