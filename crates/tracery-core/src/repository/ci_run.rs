use uuid::Uuid;

use super::Repository;
use crate::{
  Error, Result,
  model::ci_run::{CI_RUNS, CiProvider, CiRun, CiRunStats, CiRunStatus},
  predicate::{Aggregate, Condition, GroupQuery, OrderBy, Predicate, Select},
  row::Value,
  store::RowStore,
};

fn status_is(status: CiRunStatus) -> Aggregate {
  Aggregate::CountIf(Condition::Equals {
    column: "status",
    value:  Value::from(status.as_ref()),
  })
}

impl<S: RowStore> Repository<S, CiRun> {
  /// The live run a provider knows as `provider_run_id`.
  pub async fn get_by_provider_run_id(
    &self,
    project_id: Uuid,
    provider: CiProvider,
    provider_run_id: &str,
  ) -> Result<CiRun> {
    let predicate = Predicate::for_project(project_id)?
      .eq("provider", provider.as_ref())
      .eq("provider_run_id", provider_run_id);
    self
      .fetch(
        Select::new(predicate)
          .order([OrderBy::desc("started_at")])
          .limit(1),
      )
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| Error::not_found("ci run", provider_run_id))
  }

  /// Runs that include a trace.
  pub async fn get_by_trace_id(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<Vec<CiRun>> {
    let predicate =
      Predicate::for_project(project_id)?.any_of("trace_ids", &[trace_id.to_owned()]);
    self
      .fetch(Select::new(predicate).order([OrderBy::desc("started_at")]))
      .await
  }

  pub async fn stats(&self, project_id: Uuid) -> Result<CiRunStats> {
    let query = GroupQuery::new(Predicate::for_project(project_id)?)
      .aggregate("total", Aggregate::Count)
      .aggregate("succeeded", status_is(CiRunStatus::Success))
      .aggregate("failed", status_is(CiRunStatus::Failure))
      .aggregate("cancelled", status_is(CiRunStatus::Cancelled))
      .aggregate("avg_duration_ms", Aggregate::Avg("duration_ms"))
      .aggregate("total_cost", Aggregate::Sum("total_cost"))
      .aggregate("total_tokens", Aggregate::Sum("total_tokens"));
    let mut row = self
      .store
      .aggregate(&CI_RUNS, query)
      .await?
      .into_iter()
      .next()
      .unwrap_or_default();
    Ok(CiRunStats {
      total:           row.uint("total")?,
      succeeded:       row.uint("succeeded")?,
      failed:          row.uint("failed")?,
      cancelled:       row.uint("cancelled")?,
      avg_duration_ms: row.float("avg_duration_ms")?,
      total_cost:      row.float("total_cost")?,
      total_tokens:    row.uint("total_tokens")?,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Utc;

  use super::*;
  use crate::{repository::CiRunRepository, testing::MemoryStore};

  fn repo() -> CiRunRepository<MemoryStore> {
    Repository::new(Arc::new(MemoryStore::default()))
  }

  #[tokio::test]
  async fn provider_run_id_lookup_sees_latest_version() {
    let repo = repo();
    let project = Uuid::new_v4();
    let mut run = CiRun::new(project, CiProvider::GithubActions, "9001", Utc::now());
    repo.create(&run).await.unwrap();

    run.status = CiRunStatus::Success;
    run.link_trace("t-1");
    repo.update(&mut run).await.unwrap();

    let found = repo
      .get_by_provider_run_id(project, CiProvider::GithubActions, "9001")
      .await
      .unwrap();
    assert_eq!(found.status, CiRunStatus::Success);
    assert_eq!(found.trace_ids, vec!["t-1".to_owned()]);
  }

  #[tokio::test]
  async fn unknown_provider_run_is_not_found() {
    let err = repo()
      .get_by_provider_run_id(Uuid::new_v4(), CiProvider::Jenkins, "1")
      .await
      .unwrap_err();
    assert!(err.is_not_found());
  }

  #[tokio::test]
  async fn runs_are_found_by_member_trace() {
    let repo = repo();
    let project = Uuid::new_v4();
    let mut run = CiRun::new(project, CiProvider::GitlabCi, "77", Utc::now());
    run.link_trace("t-1");
    run.link_trace("t-2");
    repo.create(&run).await.unwrap();

    assert_eq!(repo.get_by_trace_id(project, "t-2").await.unwrap().len(), 1);
    assert!(repo.get_by_trace_id(project, "t-3").await.unwrap().is_empty());
  }
}
