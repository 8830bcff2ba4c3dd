use uuid::Uuid;

use super::Repository;
use crate::{
  Result,
  model::file_operation::{
    FILE_OPERATIONS, FileOperation, FileOperationKind, FileOperationStats,
  },
  predicate::{Aggregate, Condition, GroupQuery, OrderBy, Predicate},
  row::{Row, TRACE_ID, Value},
  store::RowStore,
};

fn operation_is(kind: FileOperationKind) -> Aggregate {
  Aggregate::CountIf(Condition::Equals {
    column: "operation",
    value:  Value::from(kind.as_ref()),
  })
}

fn success_is(success: bool) -> Aggregate {
  Aggregate::CountIf(Condition::Equals {
    column: "success",
    value:  Value::Bool(success),
  })
}

impl<S: RowStore> Repository<S, FileOperation> {
  /// Operations of a trace in the order they started.
  pub async fn get_by_trace_id(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<Vec<FileOperation>> {
    self
      .by_trace(project_id, trace_id, &[
        OrderBy::asc("started_at"),
        OrderBy::asc("created_at"),
      ])
      .await
  }

  /// Operation counts and line totals for a project, or for one trace.
  pub async fn stats(
    &self,
    project_id: Uuid,
    trace_id: Option<&str>,
  ) -> Result<FileOperationStats> {
    let predicate = Predicate::for_project(project_id)?.eq_opt(TRACE_ID, trace_id);
    let query = GroupQuery::new(predicate)
      .aggregate("total", Aggregate::Count)
      .aggregate("creates", operation_is(FileOperationKind::Create))
      .aggregate("reads", operation_is(FileOperationKind::Read))
      .aggregate("updates", operation_is(FileOperationKind::Update))
      .aggregate("deletes", operation_is(FileOperationKind::Delete))
      .aggregate("succeeded", success_is(true))
      .aggregate("failed", success_is(false))
      .aggregate("total_lines_added", Aggregate::Sum("lines_added"))
      .aggregate("total_lines_removed", Aggregate::Sum("lines_removed"));
    let row = self
      .store
      .aggregate(&FILE_OPERATIONS, query)
      .await?
      .into_iter()
      .next()
      .unwrap_or_default();
    stats_from_row(row)
  }
}

fn stats_from_row(mut row: Row) -> Result<FileOperationStats> {
  Ok(FileOperationStats {
    total:               row.uint("total")?,
    creates:             row.uint("creates")?,
    reads:               row.uint("reads")?,
    updates:             row.uint("updates")?,
    deletes:             row.uint("deletes")?,
    succeeded:           row.uint("succeeded")?,
    failed:              row.uint("failed")?,
    total_lines_added:   row.uint("total_lines_added")?,
    total_lines_removed: row.uint("total_lines_removed")?,
  })
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{Duration, Utc};

  use super::*;
  use crate::{repository::FileOperationRepository, testing::MemoryStore};

  #[tokio::test]
  async fn trace_operations_come_back_in_start_order() {
    let repo: FileOperationRepository<_> =
      Repository::new(Arc::new(MemoryStore::default()));
    let project = Uuid::new_v4();
    let start = Utc::now();
    let later = FileOperation::new(
      project,
      "t-1",
      FileOperationKind::Update,
      "src/lib.rs",
      start + Duration::seconds(5),
    );
    let earlier =
      FileOperation::new(project, "t-1", FileOperationKind::Read, "src/lib.rs", start);
    repo.create_batch(&[later, earlier]).await.unwrap();

    let ops = repo.get_by_trace_id(project, "t-1").await.unwrap();
    let kinds: Vec<_> = ops.iter().map(|o| o.operation).collect();
    assert_eq!(kinds, vec![FileOperationKind::Read, FileOperationKind::Update]);
  }

  #[test]
  fn empty_stats_row_is_all_zero() {
    assert_eq!(
      stats_from_row(Row::new()).unwrap(),
      FileOperationStats::default()
    );
  }
}
