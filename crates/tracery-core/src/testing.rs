//! An in-memory [`RowStore`] for unit tests.
//!
//! Keeps every physical version and resolves the live one per
//! `(project_id, id)` on read, so update-as-insert and tenant scoping behave
//! as they do in a real backend. Aggregation is left to backend tests.

use std::{
  cmp::Ordering,
  collections::HashMap,
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering as AtomicOrdering},
  },
};

use crate::{
  Error, Result,
  predicate::{Condition, Direction, GroupQuery, Predicate, Select},
  record::Record,
  row::{ID, PROJECT_ID, Row, Table, UPDATED_AT, Value},
  store::RowStore,
};

#[derive(Default)]
pub struct MemoryStore {
  tables:  Mutex<HashMap<&'static str, Vec<Row>>>,
  deletes: AtomicUsize,
  /// When set, batch inserts into this table fail.
  reject:  Mutex<Option<&'static str>>,
}

impl MemoryStore {
  pub async fn insert_record<R: Record>(&self, record: &R) {
    self
      .insert(R::TABLE, record.to_row())
      .await
      .expect("memory insert");
  }

  /// Number of `delete_where` calls issued.
  pub fn deletes(&self) -> usize { self.deletes.load(AtomicOrdering::SeqCst) }

  pub fn reject_batches_for(&self, table: &'static Table) {
    *self.reject.lock().expect("lock") = Some(table.name);
  }

  /// Ids of the live rows of a table, sorted.
  pub fn live_ids(&self, table: &Table) -> Vec<String> {
    let mut ids: Vec<String> = self
      .live(table.name)
      .iter()
      .map(|r| display(r.get(ID).unwrap_or(&Value::Null)))
      .collect();
    ids.sort();
    ids
  }

  fn live(&self, table: &str) -> Vec<Row> {
    let tables = self.tables.lock().expect("lock");
    let Some(rows) = tables.get(table) else {
      return Vec::new();
    };
    let mut latest: HashMap<(String, String), usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
      let key = identity(row);
      match latest.get(&key) {
        Some(&j)
          if compare(row.get(UPDATED_AT), rows[j].get(UPDATED_AT))
            == Some(Ordering::Less) => {}
        _ => {
          latest.insert(key, i);
        }
      }
    }
    let mut winners: Vec<usize> = latest.into_values().collect();
    winners.sort_unstable();
    winners.into_iter().map(|i| rows[i].clone()).collect()
  }

  fn matching(&self, table: &Table, predicate: &Predicate) -> Vec<Row> {
    self
      .live(table.name)
      .into_iter()
      .filter(|row| {
        predicate
          .conditions()
          .iter()
          .all(|c| self.matches(c, row))
      })
      .collect()
  }

  fn matches(&self, condition: &Condition, row: &Row) -> bool {
    let get = |c: &str| row.get(c).cloned().unwrap_or(Value::Null);
    match condition {
      Condition::Equals { column, value } => &get(column) == value,
      Condition::NotEquals { column, value } => &get(column) != value,
      Condition::Range { column, op, value } => {
        let ord = compare(Some(&get(column)), Some(value));
        match op {
          crate::predicate::RangeOp::Gt => ord == Some(Ordering::Greater),
          crate::predicate::RangeOp::Gte => {
            matches!(ord, Some(Ordering::Greater | Ordering::Equal))
          }
          crate::predicate::RangeOp::Lt => ord == Some(Ordering::Less),
          crate::predicate::RangeOp::Lte => {
            matches!(ord, Some(Ordering::Less | Ordering::Equal))
          }
        }
      }
      Condition::Substring { column, needle } => {
        matches!(get(column), Value::Text(s) if s.contains(needle.as_str()))
      }
      Condition::Search { columns, needle } => columns.iter().any(|c| {
        matches!(get(c), Value::Text(s) if s.contains(needle.as_str()))
      }),
      Condition::AnyOf { column, values } => {
        matches!(get(column), Value::List(l) if l.iter().any(|v| values.contains(v)))
      }
      Condition::InList { column, values } => values.contains(&get(column)),
      Condition::IsNull { column } => get(column).is_null(),
      Condition::NotNull { column } => !get(column).is_null(),
      Condition::Orphaned {
        trace_column,
        parent,
      } => {
        let project = get(PROJECT_ID);
        let trace_id = get(trace_column);
        !self.live(parent.name).iter().any(|t| {
          t.get(PROJECT_ID) == Some(&project) && t.get(ID) == Some(&trace_id)
        })
      }
    }
  }
}

impl RowStore for MemoryStore {
  async fn insert(&self, table: &'static Table, row: Row) -> Result<()> {
    self
      .tables
      .lock()
      .expect("lock")
      .entry(table.name)
      .or_default()
      .push(row);
    Ok(())
  }

  async fn insert_batch(&self, table: &'static Table, rows: Vec<Row>) -> Result<()> {
    if *self.reject.lock().expect("lock") == Some(table.name) {
      return Err(Error::BatchRejected {
        table: table.name,
        rows:  rows.len(),
        source: "rejected by test".into(),
      });
    }
    self
      .tables
      .lock()
      .expect("lock")
      .entry(table.name)
      .or_default()
      .extend(rows);
    Ok(())
  }

  async fn query_one(
    &self,
    table: &'static Table,
    predicate: Predicate,
  ) -> Result<Option<Row>> {
    Ok(self.matching(table, &predicate).into_iter().next())
  }

  async fn query_many(
    &self,
    table: &'static Table,
    select: Select,
  ) -> Result<Vec<Row>> {
    let mut rows = self.matching(table, &select.predicate);
    rows.sort_by(|a, b| {
      for order in &select.order_by {
        let ord = compare(a.get(order.column), b.get(order.column))
          .unwrap_or(Ordering::Equal);
        let ord = match order.direction {
          Direction::Asc => ord,
          Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
          return ord;
        }
      }
      Ordering::Equal
    });
    let rows = rows.into_iter().skip(select.offset as usize);
    Ok(match select.limit {
      Some(limit) => rows.take(limit as usize).collect(),
      None => rows.collect(),
    })
  }

  async fn count(&self, table: &'static Table, predicate: Predicate) -> Result<u64> {
    Ok(self.matching(table, &predicate).len() as u64)
  }

  async fn aggregate(
    &self,
    _table: &'static Table,
    _query: GroupQuery,
  ) -> Result<Vec<Row>> {
    Err(Error::InvalidArgument(
      "memory store does not aggregate".to_owned(),
    ))
  }

  async fn delete_where(
    &self,
    table: &'static Table,
    predicate: Predicate,
  ) -> Result<()> {
    self.deletes.fetch_add(1, AtomicOrdering::SeqCst);
    let doomed: Vec<(String, String)> = self
      .matching(table, &predicate)
      .iter()
      .map(identity)
      .collect();
    if let Some(rows) = self.tables.lock().expect("lock").get_mut(table.name) {
      rows.retain(|r| !doomed.contains(&identity(r)));
    }
    Ok(())
  }
}

fn identity(row: &Row) -> (String, String) {
  (
    display(row.get(PROJECT_ID).unwrap_or(&Value::Null)),
    display(row.get(ID).unwrap_or(&Value::Null)),
  )
}

fn display(value: &Value) -> String {
  match value {
    Value::Text(s) => s.clone(),
    Value::Uuid(u) => u.to_string(),
    other => format!("{other:?}"),
  }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
  match (a?, b?) {
    (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
    (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
    (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
    (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
    (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
    (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
    (Value::Uuid(x), Value::Uuid(y)) => Some(x.cmp(y)),
    (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
    _ => None,
  }
}
