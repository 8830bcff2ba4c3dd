use uuid::Uuid;

use super::Repository;
use crate::{
  Result,
  model::git_link::{CommitSummary, GIT_LINKS, GitLink},
  predicate::{Aggregate, GroupQuery, OrderBy, Predicate, Select},
  row::{Row, TRACE_ID},
  store::RowStore,
};

impl<S: RowStore> Repository<S, GitLink> {
  pub async fn get_by_trace_id(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<Vec<GitLink>> {
    self
      .by_trace(project_id, trace_id, &[OrderBy::desc("commit_timestamp")])
      .await
  }

  /// Every link to one commit, across traces.
  pub async fn get_by_commit_sha(
    &self,
    project_id: Uuid,
    commit_sha: &str,
  ) -> Result<Vec<GitLink>> {
    let predicate = Predicate::for_project(project_id)?.eq("commit_sha", commit_sha);
    self
      .fetch(Select::new(predicate).order([OrderBy::desc("created_at")]))
      .await
  }

  /// Commits on `branch`, newest first, with the traces linked to each.
  pub async fn timeline(
    &self,
    project_id: Uuid,
    branch: &str,
    limit: u32,
  ) -> Result<Vec<CommitSummary>> {
    let predicate = Predicate::for_project(project_id)?.eq("branch", branch);
    let query = GroupQuery::new(predicate)
      .group_by("commit_sha")
      .aggregate("commit_message", Aggregate::Any("commit_message"))
      .aggregate("commit_author", Aggregate::Any("commit_author"))
      .aggregate("commit_timestamp", Aggregate::Any("commit_timestamp"))
      .aggregate("branch", Aggregate::Any("branch"))
      .aggregate("trace_count", Aggregate::CountDistinct(TRACE_ID))
      .aggregate("trace_ids", Aggregate::CollectDistinct(TRACE_ID))
      .order([OrderBy::desc("commit_timestamp"), OrderBy::asc("commit_sha")])
      .limit(u64::from(limit.max(1)));
    self
      .store
      .aggregate(&GIT_LINKS, query)
      .await?
      .into_iter()
      .map(commit_from_row)
      .collect()
  }
}

fn commit_from_row(mut row: Row) -> Result<CommitSummary> {
  let mut trace_ids = row.list("trace_ids")?;
  trace_ids.sort();
  Ok(CommitSummary {
    commit_sha: row.text("commit_sha")?,
    commit_message: row.opt_text("commit_message")?.unwrap_or_default(),
    commit_author: row.opt_text("commit_author")?.unwrap_or_default(),
    commit_timestamp: row.timestamp("commit_timestamp")?,
    branch: row.opt_text("branch")?,
    trace_count: row.uint("trace_count")?,
    trace_ids,
  })
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Utc;

  use super::*;
  use crate::{repository::GitLinkRepository, testing::MemoryStore};

  #[tokio::test]
  async fn links_are_found_by_commit() {
    let repo: GitLinkRepository<_> = Repository::new(Arc::new(MemoryStore::default()));
    let project = Uuid::new_v4();
    let now = Utc::now();
    repo
      .create_batch(&[
        GitLink::new(project, "t-1", "abc123", now),
        GitLink::new(project, "t-2", "abc123", now),
        GitLink::new(project, "t-2", "def456", now),
      ])
      .await
      .unwrap();

    assert_eq!(repo.get_by_commit_sha(project, "abc123").await.unwrap().len(), 2);
    assert_eq!(repo.get_by_trace_id(project, "t-2").await.unwrap().len(), 2);
    assert!(
      repo
        .get_by_commit_sha(Uuid::new_v4(), "abc123")
        .await
        .unwrap()
        .is_empty()
    );
  }
}
