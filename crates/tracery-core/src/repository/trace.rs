use tracing::info;
use uuid::Uuid;

use super::Repository;
use crate::{
  Result,
  model::trace::{TRACES, Trace, TraceRollup},
  predicate::{OrderBy, Predicate, Select},
  row::ID,
  store::RowStore,
  sweeper::{self, Mode, TableSweep},
};

impl<S: RowStore> Repository<S, Trace> {
  /// Every trace in a session, oldest first.
  pub async fn get_by_session_id(
    &self,
    project_id: Uuid,
    session_id: &str,
  ) -> Result<Vec<Trace>> {
    let predicate =
      Predicate::for_project(project_id)?.eq("session_id", session_id);
    self
      .fetch(Select::new(predicate).order([OrderBy::asc("start_time")]))
      .await
  }

  /// Write a new version with the bookmark flag set or cleared.
  pub async fn set_bookmark(
    &self,
    project_id: Uuid,
    trace_id: &str,
    bookmarked: bool,
  ) -> Result<Trace> {
    let mut trace = self.get_by_id(project_id, &trace_id.to_owned()).await?;
    trace.bookmarked = bookmarked;
    self.update(&mut trace).await?;
    Ok(trace)
  }

  /// Write a new version carrying recomputed costs.
  pub async fn update_costs(
    &self,
    project_id: Uuid,
    trace_id: &str,
    input_cost: f64,
    output_cost: f64,
    total_cost: f64,
  ) -> Result<Trace> {
    let mut trace = self.get_by_id(project_id, &trace_id.to_owned()).await?;
    trace.input_cost = input_cost;
    trace.output_cost = output_cost;
    trace.total_cost = total_cost;
    self.update(&mut trace).await?;
    Ok(trace)
  }

  /// Write a new version whose totals are those of `rollup`.
  pub async fn apply_rollup(
    &self,
    project_id: Uuid,
    trace_id: &str,
    rollup: &TraceRollup,
  ) -> Result<Trace> {
    let mut trace = self.get_by_id(project_id, &trace_id.to_owned()).await?;
    trace.apply_rollup(rollup);
    self.update(&mut trace).await?;
    Ok(trace)
  }

  /// Schedule removal of every version of one trace. Child entities are left
  /// for the orphan sweep.
  pub async fn delete(&self, project_id: Uuid, trace_id: &str) -> Result<TableSweep> {
    info!(%project_id, trace_id, "deleting trace");
    let predicate = Predicate::for_project(project_id)?.eq(ID, trace_id);
    sweeper::sweep_table(&*self.store, &TRACES, predicate, Mode::Execute).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{Duration, Utc};

  use super::*;
  use crate::{repository::TraceRepository, sweeper::Purge, testing::MemoryStore};

  fn repo() -> TraceRepository<MemoryStore> {
    Repository::new(Arc::new(MemoryStore::default()))
  }

  #[tokio::test]
  async fn session_traces_are_oldest_first() {
    let repo = repo();
    let project = Uuid::new_v4();
    let start = Utc::now();
    for (id, offset) in [("late", 20), ("early", 0), ("mid", 10)] {
      let mut t = Trace::new(project, id, "run", start + Duration::seconds(offset));
      t.session_id = "s-1".into();
      repo.create(&t).await.unwrap();
    }
    repo
      .create(&Trace::new(project, "other", "run", start))
      .await
      .unwrap();

    let ids: Vec<String> = repo
      .get_by_session_id(project, "s-1")
      .await
      .unwrap()
      .into_iter()
      .map(|t| t.id)
      .collect();
    assert_eq!(ids, vec!["early", "mid", "late"]);
  }

  #[tokio::test]
  async fn bookmark_writes_a_new_version() {
    let repo = repo();
    let project = Uuid::new_v4();
    repo
      .create(&Trace::new(project, "t-1", "run", Utc::now()))
      .await
      .unwrap();

    repo.set_bookmark(project, "t-1", true).await.unwrap();
    let fetched = repo.get_by_id(project, &"t-1".to_owned()).await.unwrap();
    assert!(fetched.bookmarked);
  }

  #[tokio::test]
  async fn bookmark_on_missing_trace_is_not_found() {
    let err = repo()
      .set_bookmark(Uuid::new_v4(), "nope", true)
      .await
      .unwrap_err();
    assert!(err.is_not_found());
  }

  #[tokio::test]
  async fn delete_removes_the_trace() {
    let repo = repo();
    let project = Uuid::new_v4();
    repo
      .create(&Trace::new(project, "t-1", "run", Utc::now()))
      .await
      .unwrap();

    let sweep = repo.delete(project, "t-1").await.unwrap();
    assert_eq!(sweep.purge, Purge::Scheduled);
    assert!(
      repo
        .get_by_id(project, &"t-1".to_owned())
        .await
        .unwrap_err()
        .is_not_found()
    );
  }
}
