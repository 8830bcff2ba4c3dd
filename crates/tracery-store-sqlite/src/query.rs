//! Rendering of core predicates, selects and aggregations into SQL.
//!
//! Reads run against the `<table>_latest` view aliased as `t`. Every column
//! name is checked against the table description before it is spliced into
//! SQL; values are always bound as parameters.

use rusqlite::types::Value as SqlValue;
use tracery_core::{
  predicate::{Aggregate, Condition, Direction, GroupQuery, OrderBy, Predicate, Select},
  row::{ColumnKind, ID, PROJECT_ID, Row, Table, Value},
};

use crate::{Error, Result, encode::to_sql, schema::view_name};

/// Quote an identifier. Only ever called with names from a table description
/// or a static aggregate alias.
pub fn ident(name: &str) -> String { format!("\"{name}\"") }

fn checked(table: &'static Table, column: &str) -> Result<&'static str> {
  table
    .column(column)
    .map(|c| c.name)
    .ok_or_else(|| Error::UnknownColumn {
      table:  table.name,
      column: column.to_owned(),
    })
}

/// SQL text plus its positional parameters, in order of appearance.
#[derive(Debug, Default)]
pub struct Sql {
  pub text:   String,
  pub params: Vec<SqlValue>,
}

impl Sql {
  fn push(&mut self, text: &str) { self.text.push_str(text); }

  fn bind(&mut self, value: &Value) -> Result<()> {
    self.text.push('?');
    self.params.push(to_sql(value)?);
    Ok(())
  }

  fn bind_all<'a>(&mut self, values: impl IntoIterator<Item = &'a Value>) -> Result<()> {
    for (i, value) in values.into_iter().enumerate() {
      if i > 0 {
        self.push(", ");
      }
      self.bind(value)?;
    }
    Ok(())
  }

  fn col(&mut self, table: &'static Table, column: &str) -> Result<()> {
    let name = checked(table, column)?;
    self.push(&format!("t.{}", ident(name)));
    Ok(())
  }
}

// ─── Predicates ──────────────────────────────────────────────────────────────

fn condition(sql: &mut Sql, table: &'static Table, condition: &Condition) -> Result<()> {
  match condition {
    Condition::Equals { column, value } => {
      sql.col(table, column)?;
      sql.push(" IS ");
      sql.bind(value)?;
    }
    Condition::NotEquals { column, value } => {
      sql.col(table, column)?;
      sql.push(" IS NOT ");
      sql.bind(value)?;
    }
    Condition::Range { column, op, value } => {
      sql.col(table, column)?;
      sql.push(&format!(" {} ", op.as_sql()));
      sql.bind(value)?;
    }
    Condition::Substring { column, needle } => {
      sql.push("instr(");
      sql.col(table, column)?;
      sql.push(", ");
      sql.bind(&Value::Text(needle.clone()))?;
      sql.push(") > 0");
    }
    Condition::Search { columns, needle } => {
      sql.push("(");
      for (i, column) in columns.iter().enumerate() {
        if i > 0 {
          sql.push(" OR ");
        }
        sql.push("instr(");
        sql.col(table, column)?;
        sql.push(", ");
        sql.bind(&Value::Text(needle.clone()))?;
        sql.push(") > 0");
      }
      sql.push(")");
    }
    Condition::AnyOf { column, values } => {
      sql.push("EXISTS (SELECT 1 FROM json_each(");
      sql.col(table, column)?;
      sql.push(") AS j WHERE j.value IN (");
      let values: Vec<Value> = values.iter().cloned().map(Value::Text).collect();
      sql.bind_all(&values)?;
      sql.push("))");
    }
    Condition::InList { values, .. } if values.is_empty() => sql.push("0"),
    Condition::InList { column, values } => {
      sql.col(table, column)?;
      sql.push(" IN (");
      sql.bind_all(values)?;
      sql.push(")");
    }
    Condition::IsNull { column } => {
      sql.col(table, column)?;
      sql.push(" IS NULL");
    }
    Condition::NotNull { column } => {
      sql.col(table, column)?;
      sql.push(" IS NOT NULL");
    }
    Condition::Orphaned {
      trace_column,
      parent,
    } => {
      sql.push(&format!(
        "NOT EXISTS (SELECT 1 FROM {} AS p WHERE p.{pid} = t.{pid} AND p.{id} = ",
        view_name(parent),
        pid = ident(PROJECT_ID),
        id = ident(ID),
      ));
      sql.col(table, trace_column)?;
      sql.push(")");
    }
  }
  Ok(())
}

fn where_clause(sql: &mut Sql, table: &'static Table, predicate: &Predicate) -> Result<()> {
  for (i, c) in predicate.conditions().iter().enumerate() {
    sql.push(if i == 0 { " WHERE " } else { " AND " });
    condition(sql, table, c)?;
  }
  Ok(())
}

fn direction(order: &OrderBy) -> &'static str {
  match order.direction {
    Direction::Asc => "ASC",
    Direction::Desc => "DESC",
  }
}

fn limit_clause(sql: &mut Sql, limit: Option<u64>, offset: u64) {
  match (limit, offset) {
    (None, 0) => {}
    (limit, offset) => {
      let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
      let offset = i64::try_from(offset).unwrap_or(i64::MAX);
      sql.push(" LIMIT ? OFFSET ?");
      sql.params.push(SqlValue::Integer(limit));
      sql.params.push(SqlValue::Integer(offset));
    }
  }
}

// ─── Statements ──────────────────────────────────────────────────────────────

fn from(sql: &mut Sql, table: &'static Table) {
  sql.push(&format!(" FROM {} AS t", view_name(table)));
}

/// Output column names and kinds of a plain select, in SELECT order.
pub fn row_shape(table: &'static Table) -> Vec<(String, ColumnKind)> {
  table
    .columns
    .iter()
    .map(|c| (c.name.to_owned(), c.kind))
    .collect()
}

pub fn select(table: &'static Table, select: &Select) -> Result<Sql> {
  let mut sql = Sql::default();
  let columns: Vec<String> = table
    .columns
    .iter()
    .map(|c| format!("t.{}", ident(c.name)))
    .collect();
  sql.push(&format!("SELECT {}", columns.join(", ")));
  from(&mut sql, table);
  where_clause(&mut sql, table, &select.predicate)?;

  let mut order = Vec::with_capacity(select.order_by.len() + 1);
  for o in &select.order_by {
    order.push(format!("t.{} {}", ident(checked(table, o.column)?), direction(o)));
  }
  // Stable pages across equal sort keys.
  if !select.order_by.iter().any(|o| o.column == ID) {
    order.push(format!("t.{} ASC", ident(ID)));
  }
  sql.push(&format!(" ORDER BY {}", order.join(", ")));
  limit_clause(&mut sql, select.limit, select.offset);
  Ok(sql)
}

pub fn count(table: &'static Table, predicate: &Predicate) -> Result<Sql> {
  let mut sql = Sql::default();
  sql.push("SELECT COUNT(*)");
  from(&mut sql, table);
  where_clause(&mut sql, table, predicate)?;
  Ok(sql)
}

/// Removes every physical version of each identity whose live version
/// matches.
pub fn delete(table: &'static Table, predicate: &Predicate) -> Result<Sql> {
  let mut sql = Sql::default();
  let (pid, id) = (ident(PROJECT_ID), ident(ID));
  sql.push(&format!(
    "DELETE FROM {} WHERE ({pid}, {id}) IN (SELECT t.{pid}, t.{id}",
    table.name
  ));
  from(&mut sql, table);
  where_clause(&mut sql, table, predicate)?;
  sql.push(")");
  Ok(sql)
}

fn aggregate_expr(sql: &mut Sql, table: &'static Table, aggregate: &Aggregate) -> Result<()> {
  let wrap = |sql: &mut Sql, before: &str, column: &str, after: &str| -> Result<()> {
    sql.push(before);
    sql.col(table, column)?;
    sql.push(after);
    Ok(())
  };
  match aggregate {
    Aggregate::Count => sql.push("COUNT(*)"),
    Aggregate::CountIf(c) => {
      sql.push("COALESCE(SUM(CASE WHEN ");
      condition(sql, table, c)?;
      sql.push(" THEN 1 ELSE 0 END), 0)");
    }
    Aggregate::CountDistinct(c) => wrap(sql, "COUNT(DISTINCT ", *c, ")")?,
    Aggregate::Sum(c) => wrap(sql, "COALESCE(SUM(", *c, "), 0)")?,
    Aggregate::Avg(c) => wrap(sql, "AVG(", *c, ")")?,
    Aggregate::Min(c) => wrap(sql, "MIN(", *c, ")")?,
    Aggregate::Max(c) | Aggregate::Any(c) => wrap(sql, "MAX(", *c, ")")?,
    Aggregate::CollectDistinct(c) => {
      let column = checked(table, c)?;
      sql.push(&format!(
        "json_group_array(DISTINCT t.{col}) FILTER (WHERE t.{col} IS NOT NULL)",
        col = ident(column)
      ));
    }
  }
  Ok(())
}

/// Render a grouped aggregation, returning the SQL and its output shape.
pub fn aggregate(
  table: &'static Table,
  query: &GroupQuery,
) -> Result<(Sql, Vec<(String, ColumnKind)>)> {
  let mut sql = Sql::default();
  let mut shape = Vec::with_capacity(query.group_by.len() + query.aggregates.len());

  sql.push("SELECT ");
  let mut first = true;
  let mut sep = |sql: &mut Sql| {
    if !std::mem::take(&mut first) {
      sql.push(", ");
    }
  };
  for column in &query.group_by {
    let name = checked(table, column)?;
    sep(&mut sql);
    sql.push(&format!("t.{q} AS {q}", q = ident(name)));
    shape.push((name.to_owned(), aggregate_kind(table, name)));
  }
  for (alias, aggregate) in &query.aggregates {
    sep(&mut sql);
    aggregate_expr(&mut sql, table, aggregate)?;
    sql.push(&format!(" AS {}", ident(alias)));
    shape.push(((*alias).to_owned(), aggregate.result_kind(table)));
  }
  if shape.is_empty() {
    return Err(Error::UnknownColumn {
      table:  table.name,
      column: "<empty aggregation>".to_owned(),
    });
  }

  from(&mut sql, table);
  where_clause(&mut sql, table, &query.predicate)?;

  if !query.group_by.is_empty() {
    let groups: Vec<String> =
      query.group_by.iter().map(|c| format!("t.{}", ident(c))).collect();
    sql.push(&format!(" GROUP BY {}", groups.join(", ")));
  }

  if !query.order_by.is_empty() {
    let mut order = Vec::with_capacity(query.order_by.len());
    for o in &query.order_by {
      if !shape.iter().any(|(name, _)| name == o.column) {
        return Err(Error::UnknownColumn {
          table:  table.name,
          column: o.column.to_owned(),
        });
      }
      order.push(format!("{} {}", ident(o.column), direction(o)));
    }
    sql.push(&format!(" ORDER BY {}", order.join(", ")));
  }
  limit_clause(&mut sql, query.limit, query.offset);
  Ok((sql, shape))
}

fn aggregate_kind(table: &Table, column: &str) -> ColumnKind {
  table.column(column).map_or(ColumnKind::Text, |c| c.kind)
}

/// `INSERT` covering every column of the table, in declaration order.
pub fn insert(table: &'static Table) -> String {
  let columns: Vec<String> = table.columns.iter().map(|c| ident(c.name)).collect();
  let marks = vec!["?"; columns.len()].join(", ");
  format!(
    "INSERT INTO {} ({}) VALUES ({marks})",
    table.name,
    columns.join(", ")
  )
}

/// Parameters for [`insert`]. Absent columns bind `NULL`; unknown ones are
/// rejected.
pub fn insert_params(table: &'static Table, row: &Row) -> Result<Vec<SqlValue>> {
  if let Some((unknown, _)) = row.iter().find(|(c, _)| !table.has_column(c)) {
    return Err(Error::UnknownColumn {
      table:  table.name,
      column: unknown.to_owned(),
    });
  }
  table
    .columns
    .iter()
    .map(|c| row.get(c.name).map_or(Ok(SqlValue::Null), to_sql))
    .collect()
}

#[cfg(test)]
mod tests {
  use tracery_core::{
    model::{observation::OBSERVATIONS, trace::TRACES},
    predicate::RangeOp,
  };
  use uuid::Uuid;

  use super::*;

  #[test]
  fn predicate_binds_values_in_order() {
    let project = Uuid::new_v4();
    let predicate = Predicate::for_project(project)
      .unwrap()
      .eq("session_id", "s-1")
      .range("total_cost", RangeOp::Gte, 0.5);
    let sql = count(&TRACES, &predicate).unwrap();
    assert_eq!(
      sql.text,
      "SELECT COUNT(*) FROM traces_latest AS t WHERE t.\"project_id\" IS ? AND \
       t.\"session_id\" IS ? AND t.\"total_cost\" >= ?"
    );
    assert_eq!(sql.params.len(), 3);
    assert_eq!(sql.params[2], SqlValue::Real(0.5));
  }

  #[test]
  fn unknown_columns_never_reach_sql() {
    let predicate = Predicate::all_tenants().eq("name; DROP TABLE traces", "x");
    assert!(matches!(
      count(&TRACES, &predicate),
      Err(Error::UnknownColumn { .. })
    ));
  }

  #[test]
  fn select_appends_id_tiebreak() {
    let query = Select::new(Predicate::all_tenants())
      .order([OrderBy::desc("start_time")])
      .limit(10);
    let sql = select(&TRACES, &query).unwrap();
    assert!(
      sql
        .text
        .ends_with("ORDER BY t.\"start_time\" DESC, t.\"id\" ASC LIMIT ? OFFSET ?")
    );
  }

  #[test]
  fn orphan_condition_checks_live_parent_in_same_project() {
    let predicate = Predicate::all_tenants()
      .orphaned(&OBSERVATIONS, &TRACES)
      .unwrap();
    let sql = delete(&OBSERVATIONS, &predicate).unwrap();
    assert!(sql.text.contains(
      "NOT EXISTS (SELECT 1 FROM traces_latest AS p WHERE p.\"project_id\" = \
       t.\"project_id\" AND p.\"id\" = t.\"trace_id\")"
    ));
  }

  #[test]
  fn aggregate_order_must_name_an_output() {
    let query = GroupQuery::new(Predicate::all_tenants())
      .group_by("session_id")
      .aggregate("n", Aggregate::Count)
      .order([OrderBy::desc("total_cost")]);
    assert!(aggregate(&TRACES, &query).is_err());
  }

  #[test]
  fn insert_rejects_unknown_columns() {
    let row = Row::new().with("bogus", 1_i64);
    assert!(insert_params(&TRACES, &row).is_err());
  }
}
