//! Git links: commits correlated with a trace.

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

pub static GIT_LINKS: Table = Table {
  name:          "git_links",
  entity:        "git link",
  columns:       &[
    col(ID, K::Uuid),
    col(PROJECT_ID, K::Uuid),
    col(TRACE_ID, K::Text),
    col("commit_sha", K::Text),
    col("parent_sha", K::Text),
    col("branch", K::Text),
    col("tag", K::Text),
    col("repo_url", K::Text),
    col("commit_message", K::Text),
    col("commit_author", K::Text),
    col("commit_author_email", K::Text),
    col("commit_timestamp", K::Timestamp),
    col("files_added", K::List),
    col("files_modified", K::List),
    col("files_deleted", K::List),
    col("files_changed_count", K::Int),
    col("additions", K::Int),
    col("deletions", K::Int),
    col("link_type", K::Text),
    col("ci_run_id", K::Uuid),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  Some(TRACE_ID),
  default_order: &[OrderBy::desc("commit_timestamp")],
  sortable:      &["commit_timestamp", "branch", CREATED_AT],
};

/// How the commit relates to the trace.
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
pub enum GitLinkType {
  /// HEAD while the trace ran.
  #[default]
  Current,
  Start,
  End,
  Referenced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitLink {
  pub id:                  Uuid,
  pub project_id:          Uuid,
  pub trace_id:            String,
  pub commit_sha:          String,
  pub parent_sha:          Option<String>,
  pub branch:              Option<String>,
  pub tag:                 Option<String>,
  pub repo_url:            Option<String>,
  #[serde(default)]
  pub commit_message:      String,
  #[serde(default)]
  pub commit_author:       String,
  #[serde(default)]
  pub commit_author_email: String,
  pub commit_timestamp:    DateTime<Utc>,
  #[serde(default)]
  pub files_added:         Vec<String>,
  #[serde(default)]
  pub files_modified:      Vec<String>,
  #[serde(default)]
  pub files_deleted:       Vec<String>,
  #[serde(default)]
  pub additions:           u32,
  #[serde(default)]
  pub deletions:           u32,
  #[serde(default)]
  pub link_type:           GitLinkType,
  pub ci_run_id:           Option<Uuid>,
  #[serde(default = "Utc::now")]
  pub created_at:          DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:          DateTime<Utc>,
}

impl GitLink {
  pub fn new(
    project_id: Uuid,
    trace_id: impl Into<String>,
    commit_sha: impl Into<String>,
    commit_timestamp: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      project_id,
      trace_id: trace_id.into(),
      commit_sha: commit_sha.into(),
      parent_sha: None,
      branch: None,
      tag: None,
      repo_url: None,
      commit_message: String::new(),
      commit_author: String::new(),
      commit_author_email: String::new(),
      commit_timestamp,
      files_added: Vec::new(),
      files_modified: Vec::new(),
      files_deleted: Vec::new(),
      additions: 0,
      deletions: 0,
      link_type: GitLinkType::Current,
      ci_run_id: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn files_changed_count(&self) -> usize {
    self.files_added.len() + self.files_modified.len() + self.files_deleted.len()
  }
}

impl Record for GitLink {
  type Id = Uuid;

  const TABLE: &'static Table = &GIT_LINKS;

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
      .set("commit_sha", &self.commit_sha)
      .set("parent_sha", self.parent_sha.as_deref())
      .set("branch", self.branch.as_deref())
      .set("tag", self.tag.as_deref())
      .set("repo_url", self.repo_url.as_deref())
      .set("commit_message", &self.commit_message)
      .set("commit_author", &self.commit_author)
      .set("commit_author_email", &self.commit_author_email)
      .set("commit_timestamp", self.commit_timestamp)
      .set("files_added", self.files_added.as_slice())
      .set("files_modified", self.files_modified.as_slice())
      .set("files_deleted", self.files_deleted.as_slice())
      .set("files_changed_count", self.files_changed_count() as u64)
      .set("additions", self.additions)
      .set("deletions", self.deletions)
      .set("link_type", self.link_type.as_ref())
      .set("ci_run_id", self.ci_run_id)
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    Ok(Self {
      id:                  row.uuid(ID)?,
      project_id:          row.uuid(PROJECT_ID)?,
      trace_id:            row.text(TRACE_ID)?,
      commit_sha:          row.text("commit_sha")?,
      parent_sha:          row.opt_text("parent_sha")?,
      branch:              row.opt_text("branch")?,
      tag:                 row.opt_text("tag")?,
      repo_url:            row.opt_text("repo_url")?,
      commit_message:      row.text("commit_message")?,
      commit_author:       row.text("commit_author")?,
      commit_author_email: row.text("commit_author_email")?,
      commit_timestamp:    row.timestamp("commit_timestamp")?,
      files_added:         row.list("files_added")?,
      files_modified:      row.list("files_modified")?,
      files_deleted:       row.list("files_deleted")?,
      additions:           row.uint("additions")?,
      deletions:           row.uint("deletions")?,
      link_type:           row.parse("link_type")?,
      ci_run_id:           row.opt_uuid("ci_run_id")?,
      created_at:          row.timestamp(CREATED_AT)?,
      updated_at:          row.timestamp(UPDATED_AT)?,
    })
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLinkFilter {
  pub project_id: Uuid,
  pub trace_id:   Option<String>,
  pub commit_sha: Option<String>,
  pub branch:     Option<String>,
  pub repo_url:   Option<String>,
  pub link_type:  Option<GitLinkType>,
  pub ci_run_id:  Option<Uuid>,
  pub from_time:  Option<DateTime<Utc>>,
  pub to_time:    Option<DateTime<Utc>>,
}

impl GitLinkFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }
}

impl Filter for GitLinkFilter {
  type Record = GitLink;

  fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .eq_opt(TRACE_ID, self.trace_id.as_deref())
        .eq_opt("commit_sha", self.commit_sha.as_deref())
        .eq_opt("branch", self.branch.as_deref())
        .eq_opt("repo_url", self.repo_url.as_deref())
        .eq_opt("link_type", self.link_type.map(|t| t.as_ref().to_owned()))
        .eq_opt("ci_run_id", self.ci_run_id)
        .between("commit_timestamp", self.from_time, self.to_time),
    )
  }
}

/// One commit in a project's timeline with the traces linked to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitSummary {
  pub commit_sha:       String,
  pub commit_message:   String,
  pub commit_author:    String,
  pub commit_timestamp: DateTime<Utc>,
  pub branch:           Option<String>,
  pub trace_count:      u64,
  pub trace_ids:        Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn files_changed_count_is_derived() {
    let mut link = GitLink::new(Uuid::new_v4(), "t-1", "abc123", Utc::now());
    link.files_added = vec!["a".into()];
    link.files_modified = vec!["b".into(), "c".into()];
    assert_eq!(link.files_changed_count(), 3);
    assert_eq!(
      link.to_row().get("files_changed_count"),
      Some(&crate::row::Value::Int(3))
    );
  }

  #[test]
  fn row_round_trip_preserves_fields() {
    let mut link = GitLink::new(Uuid::new_v4(), "t-1", "abc123", Utc::now());
    link.branch = Some("main".into());
    link.link_type = GitLinkType::End;
    link.ci_run_id = Some(Uuid::new_v4());
    assert_eq!(GitLink::from_row(link.to_row()).unwrap(), link);
  }
}
