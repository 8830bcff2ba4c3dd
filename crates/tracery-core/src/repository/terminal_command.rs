use uuid::Uuid;

use super::Repository;
use crate::{
  Result,
  model::terminal_command::{TERMINAL_COMMANDS, TerminalCommand, TerminalCommandStats},
  predicate::{Aggregate, Condition, GroupQuery, OrderBy, Predicate},
  row::{Row, TRACE_ID, Value},
  store::RowStore,
};

fn flag_set(column: &'static str, value: bool) -> Aggregate {
  Aggregate::CountIf(Condition::Equals {
    column,
    value: Value::Bool(value),
  })
}

impl<S: RowStore> Repository<S, TerminalCommand> {
  pub async fn get_by_trace_id(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<Vec<TerminalCommand>> {
    self
      .by_trace(project_id, trace_id, &[
        OrderBy::asc("started_at"),
        OrderBy::asc("created_at"),
      ])
      .await
  }

  pub async fn stats(
    &self,
    project_id: Uuid,
    trace_id: Option<&str>,
  ) -> Result<TerminalCommandStats> {
    let predicate = Predicate::for_project(project_id)?.eq_opt(TRACE_ID, trace_id);
    let query = GroupQuery::new(predicate)
      .aggregate("total", Aggregate::Count)
      .aggregate("succeeded", flag_set("success", true))
      .aggregate("failed", flag_set("success", false))
      .aggregate("timed_out", flag_set("timed_out", true))
      .aggregate("avg_duration_ms", Aggregate::Avg("duration_ms"))
      .aggregate("total_duration_ms", Aggregate::Sum("duration_ms"));
    let mut row = self
      .store
      .aggregate(&TERMINAL_COMMANDS, query)
      .await?
      .into_iter()
      .next()
      .unwrap_or_else(Row::new);
    Ok(TerminalCommandStats {
      total:             row.uint("total")?,
      succeeded:         row.uint("succeeded")?,
      failed:            row.uint("failed")?,
      timed_out:         row.uint("timed_out")?,
      avg_duration_ms:   row.float("avg_duration_ms")?,
      total_duration_ms: row.uint("total_duration_ms")?,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Utc;

  use super::*;
  use crate::{repository::TerminalCommandRepository, testing::MemoryStore};

  #[tokio::test]
  async fn commands_stay_within_their_trace() {
    let repo: TerminalCommandRepository<_> =
      Repository::new(Arc::new(MemoryStore::default()));
    let project = Uuid::new_v4();
    let mut build = TerminalCommand::new(project, "t-1", "cargo", Utc::now());
    build.args = vec!["build".into()];
    let other = TerminalCommand::new(project, "t-2", "ls", Utc::now());
    repo.create_batch(&[build.clone(), other]).await.unwrap();

    let found = repo.get_by_trace_id(project, "t-1").await.unwrap();
    assert_eq!(found, vec![build]);
    assert_eq!(found[0].command_line(), "cargo build");
  }
}
