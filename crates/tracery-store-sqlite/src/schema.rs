//! SQL schema for the tracery SQLite store.
//!
//! Table DDL is derived from the core table descriptions so columns cannot
//! drift from the models. Each table gets a hidden `_seq` insertion counter
//! that breaks `updated_at` ties, and a `<table>_latest` view that exposes
//! only the live version of each `(project_id, id)`.

use tracery_core::{row::Table, sweeper::ALL_TABLES};

use crate::{encode::sql_type, query::ident};

/// Bumped whenever the derived DDL changes shape.
pub const SCHEMA_VERSION: u32 = 1;

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
";

/// Row-level checks a table enforces on insert.
fn checks(table: &Table) -> &'static [&'static str] {
  match table.name {
    "traces" => &["end_time IS NULL OR end_time >= start_time"],
    "observations" => &["end_time IS NULL OR end_time >= start_time"],
    "scores" => &["data_type IN ('NUMERIC', 'BOOLEAN', 'CATEGORICAL')"],
    _ => &[],
  }
}

/// Secondary indexes beyond identity, trace and retention.
fn extra_indexes(table: &Table) -> &'static [(&'static str, &'static str)] {
  match table.name {
    "traces" => &[
      ("session", "project_id, session_id, start_time"),
      ("start", "project_id, start_time"),
    ],
    "git_links" => &[("commit", "project_id, commit_sha")],
    "ci_runs" => &[("provider_run", "project_id, provider, provider_run_id")],
    _ => &[],
  }
}

/// Partition key and ordering that pick the live version.
pub const LIVE_WINDOW: &str =
  "PARTITION BY project_id, id ORDER BY updated_at DESC, _seq DESC";

pub fn view_name(table: &Table) -> String { format!("{}_latest", table.name) }

fn table_ddl(table: &Table) -> String {
  let mut lines = vec!["    _seq INTEGER PRIMARY KEY AUTOINCREMENT".to_owned()];
  for column in table.columns {
    let not_null = matches!(column.name, "id" | "project_id" | "created_at" | "updated_at");
    lines.push(format!(
      "    {} {}{}",
      ident(column.name),
      sql_type(column.kind),
      if not_null { " NOT NULL" } else { "" },
    ));
  }
  for check in checks(table) {
    lines.push(format!("    CHECK ({check})"));
  }
  format!(
    "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
    table.name,
    lines.join(",\n")
  )
}

fn index_ddl(table: &Table) -> String {
  let mut indexes = vec![
    ("identity", "project_id, id, updated_at".to_owned()),
    ("created", "project_id, created_at".to_owned()),
  ];
  if let Some(trace_column) = table.trace_column {
    indexes.push(("trace", format!("project_id, {trace_column}")));
  }
  indexes.extend(
    extra_indexes(table)
      .iter()
      .map(|(name, columns)| (*name, (*columns).to_owned())),
  );
  indexes
    .into_iter()
    .map(|(name, columns)| {
      format!(
        "CREATE INDEX IF NOT EXISTS {table}_{name} ON {table} ({columns});\n",
        table = table.name
      )
    })
    .collect()
}

fn view_ddl(table: &Table) -> String {
  let columns: Vec<String> = table.columns.iter().map(|c| ident(c.name)).collect();
  format!(
    "CREATE VIEW IF NOT EXISTS {view} AS\n    SELECT {columns}\n    FROM (SELECT *, ROW_NUMBER() OVER ({LIVE_WINDOW}) AS _rn FROM {table})\n    WHERE _rn = 1;\n",
    view = view_name(table),
    columns = columns.join(", "),
    table = table.name,
  )
}

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub fn schema() -> String {
  let mut sql = PRAGMAS.to_owned();
  for table in ALL_TABLES {
    sql.push_str(&table_ddl(table));
    sql.push_str(&index_ddl(table));
    sql.push_str(&view_ddl(table));
  }
  sql.push_str(&format!("PRAGMA user_version = {SCHEMA_VERSION};\n"));
  sql
}

#[cfg(test)]
mod tests {
  use tracery_core::model::trace::TRACES;

  use super::*;

  #[test]
  fn trace_ddl_carries_end_time_check() {
    let ddl = table_ddl(&TRACES);
    assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS traces ("));
    assert!(ddl.contains("CHECK (end_time IS NULL OR end_time >= start_time)"));
    assert!(ddl.contains("\"project_id\" TEXT NOT NULL"));
  }

  #[test]
  fn every_table_has_a_latest_view() {
    let sql = schema();
    for table in ALL_TABLES {
      assert!(sql.contains(&format!("CREATE VIEW IF NOT EXISTS {}_latest", table.name)));
    }
  }
}
