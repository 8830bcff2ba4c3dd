//! [`SqliteStore`], the SQLite implementation of [`RowStore`].

use std::{path::Path, time::Duration};

use rusqlite::types::Value as SqlValue;
use tracery_core::{
  Error as CoreError, Result as CoreResult,
  predicate::{GroupQuery, Predicate, Select},
  row::{ColumnKind, Row, Table},
  store::RowStore,
  sweeper::ALL_TABLES,
};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  encode::from_sql,
  query::{self, Sql},
  schema::{LIVE_WINDOW, schema},
};

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
  /// Upper bound on any single store call, queueing included.
  pub query_timeout: Duration,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      query_timeout: Duration::from_secs(30),
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A tracery row store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  options: StoreOptions,
}

type Cells = Vec<Vec<SqlValue>>;

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self {
      conn,
      options: StoreOptions::default(),
    };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self {
      conn,
      options: StoreOptions::default(),
    };
    store.init_schema().await?;
    Ok(store)
  }

  pub fn with_options(mut self, options: StoreOptions) -> Self {
    self.options = options;
    self
  }

  #[cfg(test)]
  pub(crate) fn connection(&self) -> tokio_rusqlite::Connection { self.conn.clone() }

  async fn init_schema(&self) -> Result<()> {
    let ddl = schema();
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&ddl)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` on the connection thread under the query deadline.
  async fn run<T, F>(&self, op: &'static str, table: &'static Table, f: F) -> CoreResult<T>
  where
    F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
  {
    match tokio::time::timeout(self.options.query_timeout, self.conn.call(f)).await {
      Ok(result) => result.map_err(|e| Error::from(e).into_core(op, table.name)),
      Err(_) => {
        warn!(op, table = table.name, "store call exceeded its deadline");
        Err(CoreError::DeadlineExceeded {
          op,
          table: table.name,
        })
      }
    }
  }

  /// Run a read and collect every cell.
  async fn read(
    &self,
    op: &'static str,
    table: &'static Table,
    sql: Sql,
  ) -> CoreResult<Cells> {
    self
      .run(op, table, move |conn| {
        let mut stmt = conn.prepare_cached(&sql.text)?;
        let width = stmt.column_count();
        let rows = stmt
          .query_map(rusqlite::params_from_iter(sql.params), |r| {
            (0..width)
              .map(|i| r.get::<_, SqlValue>(i))
              .collect::<rusqlite::Result<Vec<_>>>()
          })?
          .collect::<rusqlite::Result<Cells>>()?;
        Ok(rows)
      })
      .await
  }

  /// Physically drop superseded versions. Reads are unaffected; returns the
  /// number of rows removed.
  pub async fn compact(&self) -> Result<u64> {
    let removed = self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        let mut removed = 0;
        for table in ALL_TABLES {
          removed += tx.execute(
            &format!(
              "DELETE FROM {t} WHERE _seq IN (SELECT _seq FROM (SELECT _seq, \
               ROW_NUMBER() OVER ({LIVE_WINDOW}) AS _rn FROM {t}) WHERE _rn > 1)",
              t = table.name
            ),
            [],
          )?;
        }
        tx.commit()?;
        Ok(removed as u64)
      })
      .await?;
    info!(removed, "compaction finished");
    Ok(removed)
  }
}

fn decode(
  table: &'static str,
  shape: &[(String, ColumnKind)],
  cells: Vec<SqlValue>,
) -> CoreResult<Row> {
  shape
    .iter()
    .zip(cells)
    .map(|((name, kind), raw)| {
      from_sql(name, *kind, raw)
        .map(|v| (name.clone(), v))
        .map_err(|e| e.into_core("decode", table))
    })
    .collect()
}

fn bad_query(op: &'static str, table: &'static Table) -> impl FnOnce(Error) -> CoreError {
  move |e| e.into_core(op, table.name)
}

// ─── RowStore impl ───────────────────────────────────────────────────────────

impl RowStore for SqliteStore {
  async fn insert(&self, table: &'static Table, row: Row) -> CoreResult<()> {
    let sql = query::insert(table);
    let params = query::insert_params(table, &row).map_err(bad_query("insert", table))?;
    self
      .run("insert", table, move |conn| {
        conn.prepare_cached(&sql)?.execute(rusqlite::params_from_iter(params))?;
        Ok(())
      })
      .await
  }

  async fn insert_batch(&self, table: &'static Table, rows: Vec<Row>) -> CoreResult<()> {
    let count = rows.len();
    let sql = query::insert(table);
    let params = rows
      .iter()
      .map(|row| query::insert_params(table, row))
      .collect::<Result<Vec<_>>>()
      .map_err(bad_query("insert_batch", table))?;

    let call = self.conn.call(move |conn| {
      let tx = conn.transaction()?;
      {
        let mut stmt = tx.prepare_cached(&sql)?;
        for p in params {
          stmt.execute(rusqlite::params_from_iter(p))?;
        }
      }
      tx.commit()?;
      Ok(())
    });
    match tokio::time::timeout(self.options.query_timeout, call).await {
      Ok(Ok(())) => {
        debug!(table = table.name, rows = count, "batch committed");
        Ok(())
      }
      Ok(Err(e)) => {
        warn!(table = table.name, rows = count, error = %e, "batch rolled back");
        let e = Error::from(e);
        if e.is_constraint() {
          return Err(e.into_core("insert_batch", table.name));
        }
        Err(CoreError::BatchRejected {
          table: table.name,
          rows:  count,
          source: Box::new(e),
        })
      }
      Err(_) => Err(CoreError::DeadlineExceeded {
        op:    "insert_batch",
        table: table.name,
      }),
    }
  }

  async fn query_one(
    &self,
    table: &'static Table,
    predicate: Predicate,
  ) -> CoreResult<Option<Row>> {
    let rows = self
      .query_many(table, Select::new(predicate).limit(1))
      .await?;
    Ok(rows.into_iter().next())
  }

  async fn query_many(&self, table: &'static Table, select: Select) -> CoreResult<Vec<Row>> {
    let sql = query::select(table, &select).map_err(bad_query("query", table))?;
    let shape = query::row_shape(table);
    self
      .read("query", table, sql)
      .await?
      .into_iter()
      .map(|cells| decode(table.name, &shape, cells))
      .collect()
  }

  async fn count(&self, table: &'static Table, predicate: Predicate) -> CoreResult<u64> {
    let sql = query::count(table, &predicate).map_err(bad_query("count", table))?;
    self
      .run("count", table, move |conn| {
        let n: i64 = conn
          .prepare_cached(&sql.text)?
          .query_row(rusqlite::params_from_iter(sql.params), |r| r.get(0))?;
        Ok(u64::try_from(n).unwrap_or_default())
      })
      .await
  }

  async fn aggregate(&self, table: &'static Table, query: GroupQuery) -> CoreResult<Vec<Row>> {
    let (sql, shape) = query::aggregate(table, &query).map_err(bad_query("aggregate", table))?;
    self
      .read("aggregate", table, sql)
      .await?
      .into_iter()
      .map(|cells| decode(table.name, &shape, cells))
      .collect()
  }

  async fn delete_where(&self, table: &'static Table, predicate: Predicate) -> CoreResult<()> {
    let sql = query::delete(table, &predicate).map_err(bad_query("delete", table))?;
    let removed = self
      .run("delete", table, move |conn| {
        Ok(conn.execute(&sql.text, rusqlite::params_from_iter(sql.params))?)
      })
      .await?;
    debug!(table = table.name, removed, "delete applied");
    Ok(())
  }
}
