//! Error types for `tracery-core`.
//!
//! Backends convert their own failures into this taxonomy at the
//! [`RowStore`](crate::store::RowStore) boundary, so repositories and callers
//! only ever match on these variants.

use thiserror::Error;

/// Boxed source error carried by the transient variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
  /// A point lookup found nothing. Also returned when the row exists under a
  /// different project.
  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  /// The caller supplied something the store refuses to run.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// The backing store could not be reached or failed mid-operation.
  #[error("store unavailable during {op} on {table}: {source}")]
  StoreUnavailable {
    op:     &'static str,
    table:  &'static str,
    #[source]
    source: BoxError,
  },

  /// A batch insert failed; none of its rows are visible.
  #[error("batch of {rows} rows rejected by {table}: {source}")]
  BatchRejected {
    table:  &'static str,
    rows:   usize,
    #[source]
    source: BoxError,
  },

  #[error("{op} on {table} exceeded its deadline")]
  DeadlineExceeded { op: &'static str, table: &'static str },

  /// A stored value could not be turned back into its domain type.
  #[error("cannot decode column {column}: {reason}")]
  Decode { column: String, reason: String },
}

impl Error {
  pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
    Self::NotFound {
      entity,
      id: id.to_string(),
    }
  }

  pub fn decode(column: impl Into<String>, reason: impl ToString) -> Self {
    Self::Decode {
      column: column.into(),
      reason: reason.to_string(),
    }
  }

  pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }

  /// Whether retrying the same call later may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::StoreUnavailable { .. }
        | Self::BatchRejected { .. }
        | Self::DeadlineExceeded { .. }
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn not_found_is_not_transient() {
    let err = Error::not_found("trace", "t-1");
    assert!(err.is_not_found());
    assert!(!err.is_transient());
    assert_eq!(err.to_string(), "trace not found: t-1");
  }

  #[test]
  fn deadline_is_transient() {
    let err = Error::DeadlineExceeded {
      op:    "count",
      table: "traces",
    };
    assert!(err.is_transient());
  }
}
