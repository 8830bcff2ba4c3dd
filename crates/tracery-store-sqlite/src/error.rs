//! Error type for `tracery-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown column {column:?} on {table}")]
  UnknownColumn { table: &'static str, column: String },

  #[error("column {column} holds {found}, expected {expected}")]
  Unexpected {
    column:   String,
    expected: &'static str,
    found:    String,
  },
}

impl Error {
  /// Whether SQLite refused the statement over a constraint (CHECK, NOT
  /// NULL). Retrying the same data cannot succeed.
  pub fn is_constraint(&self) -> bool {
    let code = match self {
      Self::Database(tokio_rusqlite::Error::Rusqlite(e)) | Self::Sqlite(e) => {
        e.sqlite_error_code()
      }
      _ => None,
    };
    code == Some(rusqlite::ErrorCode::ConstraintViolation)
  }

  /// Map onto the core taxonomy, tagging transient failures with the
  /// operation and table they hit.
  pub fn into_core(self, op: &'static str, table: &'static str) -> tracery_core::Error {
    use tracery_core::Error as Core;
    if self.is_constraint() {
      return Core::InvalidArgument(format!("{op} on {table} rejected: {self}"));
    }
    match self {
      Self::Database(e) => Core::StoreUnavailable {
        op,
        table,
        source: Box::new(e),
      },
      Self::Sqlite(e) => Core::StoreUnavailable {
        op,
        table,
        source: Box::new(e),
      },
      Self::UnknownColumn { .. } => Core::InvalidArgument(self.to_string()),
      Self::Unexpected { ref column, .. } => Core::decode(column.clone(), &self),
      Self::Json(e) => Core::decode(table, e),
      Self::Uuid(e) => Core::decode(table, e),
      Self::DateParse(e) => Core::decode(table, e),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
