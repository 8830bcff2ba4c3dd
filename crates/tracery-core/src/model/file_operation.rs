//! File operations performed by an agent's tools.

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

pub static FILE_OPERATIONS: Table = Table {
  name:          "file_operations",
  entity:        "file operation",
  columns:       &[
    col(ID, K::Uuid),
    col(PROJECT_ID, K::Uuid),
    col(TRACE_ID, K::Text),
    col("observation_id", K::Text),
    col("operation", K::Text),
    col("file_path", K::Text),
    col("new_path", K::Text),
    col("file_size", K::Int),
    col("file_mode", K::Text),
    col("content_hash", K::Text),
    col("mime_type", K::Text),
    col("lines_added", K::Int),
    col("lines_removed", K::Int),
    col("diff_preview", K::Text),
    col("content_before_hash", K::Text),
    col("content_after_hash", K::Text),
    col("tool_name", K::Text),
    col("reason", K::Text),
    col("started_at", K::Timestamp),
    col("completed_at", K::Timestamp),
    col("duration_ms", K::Int),
    col("success", K::Bool),
    col("error_message", K::Text),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  Some(TRACE_ID),
  default_order: &[OrderBy::desc("started_at")],
  sortable:      &["started_at", "file_path", "duration_ms", CREATED_AT],
};

#[derive(
  Debug,
  Clone,
  Copy,
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
pub enum FileOperationKind {
  Create,
  Read,
  Update,
  Delete,
  Rename,
  Move,
  Copy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperation {
  pub id:                  Uuid,
  pub project_id:          Uuid,
  pub trace_id:            String,
  pub observation_id:      Option<String>,
  pub operation:           FileOperationKind,
  pub file_path:           String,
  /// Destination for renames, moves and copies.
  pub new_path:            Option<String>,
  #[serde(default)]
  pub file_size:           u64,
  pub file_mode:           Option<String>,
  pub content_hash:        Option<String>,
  pub mime_type:           Option<String>,
  #[serde(default)]
  pub lines_added:         u32,
  #[serde(default)]
  pub lines_removed:       u32,
  pub diff_preview:        Option<String>,
  pub content_before_hash: Option<String>,
  pub content_after_hash:  Option<String>,
  pub tool_name:           Option<String>,
  pub reason:              Option<String>,
  pub started_at:          DateTime<Utc>,
  pub completed_at:        Option<DateTime<Utc>>,
  #[serde(default)]
  pub duration_ms:         u32,
  #[serde(default = "yes")]
  pub success:             bool,
  pub error_message:       Option<String>,
  #[serde(default = "Utc::now")]
  pub created_at:          DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:          DateTime<Utc>,
}

fn yes() -> bool { true }

impl FileOperation {
  pub fn new(
    project_id: Uuid,
    trace_id: impl Into<String>,
    operation: FileOperationKind,
    file_path: impl Into<String>,
    started_at: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      project_id,
      trace_id: trace_id.into(),
      observation_id: None,
      operation,
      file_path: file_path.into(),
      new_path: None,
      file_size: 0,
      file_mode: None,
      content_hash: None,
      mime_type: None,
      lines_added: 0,
      lines_removed: 0,
      diff_preview: None,
      content_before_hash: None,
      content_after_hash: None,
      tool_name: None,
      reason: None,
      started_at,
      completed_at: None,
      duration_ms: 0,
      success: true,
      error_message: None,
      created_at: now,
      updated_at: now,
    }
  }
}

impl Record for FileOperation {
  type Id = Uuid;

  const TABLE: &'static Table = &FILE_OPERATIONS;

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
      .set("operation", self.operation.as_ref())
      .set("file_path", &self.file_path)
      .set("new_path", self.new_path.as_deref())
      .set("file_size", self.file_size)
      .set("file_mode", self.file_mode.as_deref())
      .set("content_hash", self.content_hash.as_deref())
      .set("mime_type", self.mime_type.as_deref())
      .set("lines_added", self.lines_added)
      .set("lines_removed", self.lines_removed)
      .set("diff_preview", self.diff_preview.as_deref())
      .set("content_before_hash", self.content_before_hash.as_deref())
      .set("content_after_hash", self.content_after_hash.as_deref())
      .set("tool_name", self.tool_name.as_deref())
      .set("reason", self.reason.as_deref())
      .set("started_at", self.started_at)
      .set("completed_at", self.completed_at)
      .set("duration_ms", self.duration_ms)
      .set("success", self.success)
      .set("error_message", self.error_message.as_deref())
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    Ok(Self {
      id:                  row.uuid(ID)?,
      project_id:          row.uuid(PROJECT_ID)?,
      trace_id:            row.text(TRACE_ID)?,
      observation_id:      row.opt_text("observation_id")?,
      operation:           row.parse("operation")?,
      file_path:           row.text("file_path")?,
      new_path:            row.opt_text("new_path")?,
      file_size:           row.uint("file_size")?,
      file_mode:           row.opt_text("file_mode")?,
      content_hash:        row.opt_text("content_hash")?,
      mime_type:           row.opt_text("mime_type")?,
      lines_added:         row.uint("lines_added")?,
      lines_removed:       row.uint("lines_removed")?,
      diff_preview:        row.opt_text("diff_preview")?,
      content_before_hash: row.opt_text("content_before_hash")?,
      content_after_hash:  row.opt_text("content_after_hash")?,
      tool_name:           row.opt_text("tool_name")?,
      reason:              row.opt_text("reason")?,
      started_at:          row.timestamp("started_at")?,
      completed_at:        row.opt_timestamp("completed_at")?,
      duration_ms:         row.uint("duration_ms")?,
      success:             row.bool("success")?,
      error_message:       row.opt_text("error_message")?,
      created_at:          row.timestamp(CREATED_AT)?,
      updated_at:          row.timestamp(UPDATED_AT)?,
    })
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOperationFilter {
  pub project_id:     Uuid,
  pub trace_id:       Option<String>,
  pub observation_id: Option<String>,
  pub operation:      Option<FileOperationKind>,
  /// Substring of the file path.
  pub file_path:      Option<String>,
  pub tool_name:      Option<String>,
  pub success:        Option<bool>,
  pub from_time:      Option<DateTime<Utc>>,
  pub to_time:        Option<DateTime<Utc>>,
}

impl FileOperationFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }
}

impl Filter for FileOperationFilter {
  type Record = FileOperation;

  fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .eq_opt(TRACE_ID, self.trace_id.as_deref())
        .eq_opt("observation_id", self.observation_id.as_deref())
        .eq_opt("operation", self.operation.map(|o| o.as_ref().to_owned()))
        .contains("file_path", self.file_path.as_deref())
        .eq_opt("tool_name", self.tool_name.as_deref())
        .eq_opt("success", self.success)
        .between("started_at", self.from_time, self.to_time),
    )
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileOperationStats {
  pub total:               u64,
  pub creates:             u64,
  pub reads:               u64,
  pub updates:             u64,
  pub deletes:             u64,
  pub succeeded:           u64,
  pub failed:              u64,
  pub total_lines_added:   u64,
  pub total_lines_removed: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_round_trip_preserves_fields() {
    let mut op = FileOperation::new(
      Uuid::new_v4(),
      "t-1",
      FileOperationKind::Rename,
      "src/old.rs",
      Utc::now(),
    );
    op.new_path = Some("src/new.rs".into());
    op.success = false;
    op.error_message = Some("permission denied".into());
    assert_eq!(FileOperation::from_row(op.to_row()).unwrap(), op);
  }
}
