//! Checkpoints: workspace snapshots taken during a trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Result,
  predicate::{OrderBy, Predicate},
  record::{Filter, Record},
  row::{
    CREATED_AT, ColumnKind as K, ID, PROJECT_ID, Row, TRACE_ID, Table,
    UPDATED_AT, col,
  },
};

pub static CHECKPOINTS: Table = Table {
  name:          "checkpoints",
  entity:        "checkpoint",
  columns:       &[
    col(ID, K::Uuid),
    col(PROJECT_ID, K::Uuid),
    col(TRACE_ID, K::Text),
    col("observation_id", K::Text),
    col("name", K::Text),
    col("description", K::Text),
    col("checkpoint_type", K::Text),
    col("git_commit_sha", K::Text),
    col("git_branch", K::Text),
    col("git_repo_url", K::Text),
    col("files_snapshot", K::Text),
    col("files_changed", K::List),
    col("storage_path", K::Text),
    col("total_files", K::Int),
    col("total_size_bytes", K::Int),
    col("restored_from", K::Uuid),
    col("restored_at", K::Timestamp),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  Some(TRACE_ID),
  default_order: &[OrderBy::desc(CREATED_AT)],
  sortable:      &["name", "total_size_bytes", CREATED_AT],
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckpointType {
  #[default]
  Manual,
  Auto,
  PreEdit,
  PostEdit,
  Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub id:               Uuid,
  pub project_id:       Uuid,
  pub trace_id:         String,
  pub observation_id:   Option<String>,
  pub name:             String,
  #[serde(default)]
  pub description:      String,
  #[serde(rename = "type", default)]
  pub kind:             CheckpointType,
  pub git_commit_sha:   Option<String>,
  pub git_branch:       Option<String>,
  pub git_repo_url:     Option<String>,
  /// Serialized manifest of the snapshotted files.
  pub files_snapshot:   Option<String>,
  #[serde(default)]
  pub files_changed:    Vec<String>,
  pub storage_path:     Option<String>,
  #[serde(default)]
  pub total_files:      u32,
  #[serde(default)]
  pub total_size_bytes: u64,
  /// The checkpoint this one was restored from, for rollbacks.
  pub restored_from:    Option<Uuid>,
  pub restored_at:      Option<DateTime<Utc>>,
  #[serde(default = "Utc::now")]
  pub created_at:       DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:       DateTime<Utc>,
}

impl Checkpoint {
  pub fn new(
    project_id: Uuid,
    trace_id: impl Into<String>,
    name: impl Into<String>,
    kind: CheckpointType,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      project_id,
      trace_id: trace_id.into(),
      observation_id: None,
      name: name.into(),
      description: String::new(),
      kind,
      git_commit_sha: None,
      git_branch: None,
      git_repo_url: None,
      files_snapshot: None,
      files_changed: Vec::new(),
      storage_path: None,
      total_files: 0,
      total_size_bytes: 0,
      restored_from: None,
      restored_at: None,
      created_at: now,
      updated_at: now,
    }
  }
}

impl Record for Checkpoint {
  type Id = Uuid;

  const TABLE: &'static Table = &CHECKPOINTS;

  fn id(&self) -> Uuid { self.id }

  fn project_id(&self) -> Uuid { self.project_id }

  fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn to_row(&self) -> Row {
    let mut row = Row::new();
    row
      .set(ID, self.id)
      .set(PROJECT_ID, self.project_id)
      .set(TRACE_ID, &self.trace_id)
      .set("observation_id", self.observation_id.as_deref())
      .set("name", &self.name)
      .set("description", &self.description)
      .set("checkpoint_type", self.kind.as_ref())
      .set("git_commit_sha", self.git_commit_sha.as_deref())
      .set("git_branch", self.git_branch.as_deref())
      .set("git_repo_url", self.git_repo_url.as_deref())
      .set("files_snapshot", self.files_snapshot.as_deref())
      .set("files_changed", self.files_changed.as_slice())
      .set("storage_path", self.storage_path.as_deref())
      .set("total_files", self.total_files)
      .set("total_size_bytes", self.total_size_bytes)
      .set("restored_from", self.restored_from)
      .set("restored_at", self.restored_at)
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    Ok(Self {
      id:               row.uuid(ID)?,
      project_id:       row.uuid(PROJECT_ID)?,
      trace_id:         row.text(TRACE_ID)?,
      observation_id:   row.opt_text("observation_id")?,
      name:             row.text("name")?,
      description:      row.text("description")?,
      kind:             row.parse("checkpoint_type")?,
      git_commit_sha:   row.opt_text("git_commit_sha")?,
      git_branch:       row.opt_text("git_branch")?,
      git_repo_url:     row.opt_text("git_repo_url")?,
      files_snapshot:   row.opt_text("files_snapshot")?,
      files_changed:    row.list("files_changed")?,
      storage_path:     row.opt_text("storage_path")?,
      total_files:      row.uint("total_files")?,
      total_size_bytes: row.uint("total_size_bytes")?,
      restored_from:    row.opt_uuid("restored_from")?,
      restored_at:      row.opt_timestamp("restored_at")?,
      created_at:       row.timestamp(CREATED_AT)?,
      updated_at:       row.timestamp(UPDATED_AT)?,
    })
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointFilter {
  pub project_id:     Uuid,
  pub trace_id:       Option<String>,
  #[serde(rename = "type")]
  pub kind:           Option<CheckpointType>,
  pub git_commit_sha: Option<String>,
  pub git_branch:     Option<String>,
  pub from_time:      Option<DateTime<Utc>>,
  pub to_time:        Option<DateTime<Utc>>,
}

impl CheckpointFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }
}

impl Filter for CheckpointFilter {
  type Record = Checkpoint;

  fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .eq_opt(TRACE_ID, self.trace_id.as_deref())
        .eq_opt("checkpoint_type", self.kind.map(|k| k.as_ref().to_owned()))
        .eq_opt("git_commit_sha", self.git_commit_sha.as_deref())
        .eq_opt("git_branch", self.git_branch.as_deref())
        .between(CREATED_AT, self.from_time, self.to_time),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_round_trip_preserves_fields() {
    let mut cp = Checkpoint::new(
      Uuid::new_v4(),
      "t-1",
      "before refactor",
      CheckpointType::PreEdit,
    );
    cp.files_changed = vec!["src/lib.rs".into()];
    cp.total_size_bytes = 4096;
    cp.restored_from = Some(Uuid::new_v4());
    assert_eq!(Checkpoint::from_row(cp.to_row()).unwrap(), cp);
  }

  #[test]
  fn type_uses_snake_case() {
    assert_eq!(CheckpointType::PostEdit.as_ref(), "post_edit");
    assert_eq!(
      "rollback".parse::<CheckpointType>().unwrap(),
      CheckpointType::Rollback
    );
  }
}
