use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Repository;
use crate::{
  Result,
  model::checkpoint::{Checkpoint, CheckpointType},
  predicate::{OrderBy, Predicate, Select},
  store::RowStore,
};

impl<S: RowStore> Repository<S, Checkpoint> {
  /// Checkpoints of a trace in the order they were taken.
  pub async fn get_by_trace_id(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<Vec<Checkpoint>> {
    self
      .by_trace(project_id, trace_id, &[OrderBy::asc("created_at")])
      .await
  }

  pub async fn get_by_commit(
    &self,
    project_id: Uuid,
    commit_sha: &str,
  ) -> Result<Vec<Checkpoint>> {
    let predicate =
      Predicate::for_project(project_id)?.eq("git_commit_sha", commit_sha);
    self
      .fetch(Select::new(predicate).order([OrderBy::desc("created_at")]))
      .await
  }

  /// Record a rollback: a new `rollback` checkpoint pointing at `source`.
  pub async fn record_restore(
    &self,
    project_id: Uuid,
    source_id: Uuid,
    restored_at: DateTime<Utc>,
  ) -> Result<Checkpoint> {
    let source = self.get_by_id(project_id, &source_id).await?;
    let mut restore = Checkpoint::new(
      project_id,
      source.trace_id.clone(),
      format!("restore {}", source.name),
      CheckpointType::Rollback,
    );
    restore.observation_id = source.observation_id.clone();
    restore.git_commit_sha = source.git_commit_sha.clone();
    restore.git_branch = source.git_branch.clone();
    restore.git_repo_url = source.git_repo_url.clone();
    restore.files_changed = source.files_changed.clone();
    restore.storage_path = source.storage_path.clone();
    restore.total_files = source.total_files;
    restore.total_size_bytes = source.total_size_bytes;
    restore.restored_from = Some(source.id);
    restore.restored_at = Some(restored_at);
    self.create(&restore).await?;
    Ok(restore)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{repository::CheckpointRepository, testing::MemoryStore};

  #[tokio::test]
  async fn restore_points_back_at_source() {
    let repo: CheckpointRepository<_> =
      Repository::new(Arc::new(MemoryStore::default()));
    let project = Uuid::new_v4();
    let mut source =
      Checkpoint::new(project, "t-1", "before edit", CheckpointType::PreEdit);
    source.total_files = 12;
    repo.create(&source).await.unwrap();

    let restore = repo
      .record_restore(project, source.id, Utc::now())
      .await
      .unwrap();
    assert_eq!(restore.kind, CheckpointType::Rollback);
    assert_eq!(restore.restored_from, Some(source.id));
    assert_eq!(restore.total_files, 12);

    let all = repo.get_by_trace_id(project, "t-1").await.unwrap();
    assert_eq!(all.len(), 2);
  }

  #[tokio::test]
  async fn restore_from_missing_checkpoint_fails() {
    let repo: CheckpointRepository<_> =
      Repository::new(Arc::new(MemoryStore::default()));
    let err = repo
      .record_restore(Uuid::new_v4(), Uuid::new_v4(), Utc::now())
      .await
      .unwrap_err();
    assert!(err.is_not_found());
  }
}
