//! CI runs: pipeline executions correlated with one or more traces.
//!
//! A CI run references traces through a list rather than a single trace
//! column, so it is never treated as an orphan of a deleted trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Result,
  predicate::{OrderBy, Predicate},
  record::{Filter, Record},
  row::{
    CREATED_AT, ColumnKind as K, ID, PROJECT_ID, Row, Table, UPDATED_AT, col,
  },
};

pub static CI_RUNS: Table = Table {
  name:          "ci_runs",
  entity:        "ci run",
  columns:       &[
    col(ID, K::Uuid),
    col(PROJECT_ID, K::Uuid),
    col("provider", K::Text),
    col("provider_run_id", K::Text),
    col("provider_run_url", K::Text),
    col("pipeline_name", K::Text),
    col("job_name", K::Text),
    col("workflow_name", K::Text),
    col("git_commit_sha", K::Text),
    col("git_branch", K::Text),
    col("git_tag", K::Text),
    col("git_repo_url", K::Text),
    col("git_ref", K::Text),
    col("pr_number", K::Int),
    col("pr_title", K::Text),
    col("pr_source_branch", K::Text),
    col("pr_target_branch", K::Text),
    col("started_at", K::Timestamp),
    col("completed_at", K::Timestamp),
    col("duration_ms", K::Int),
    col("status", K::Text),
    col("conclusion", K::Text),
    col("error_message", K::Text),
    col("trace_ids", K::List),
    col("trace_count", K::Int),
    col("total_cost", K::Float),
    col("total_tokens", K::Int),
    col("total_observations", K::Int),
    col("runner_name", K::Text),
    col("runner_os", K::Text),
    col("runner_arch", K::Text),
    col("triggered_by", K::Text),
    col("trigger_event", K::Text),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  None,
  default_order: &[OrderBy::desc("started_at")],
  sortable:      &["started_at", "duration_ms", "total_cost", "status", CREATED_AT],
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
pub enum CiProvider {
  GithubActions,
  GitlabCi,
  Jenkins,
  Circleci,
  AzureDevops,
  Bitbucket,
  Other,
}

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
pub enum CiRunStatus {
  #[default]
  Pending,
  Running,
  Success,
  Failure,
  Cancelled,
  Skipped,
}

impl CiRunStatus {
  pub fn is_finished(self) -> bool {
    !matches!(self, Self::Pending | Self::Running)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiRun {
  pub id:                 Uuid,
  pub project_id:         Uuid,
  pub provider:           CiProvider,
  pub provider_run_id:    String,
  pub provider_run_url:   Option<String>,
  pub pipeline_name:      Option<String>,
  pub job_name:           Option<String>,
  pub workflow_name:      Option<String>,
  pub git_commit_sha:     Option<String>,
  pub git_branch:         Option<String>,
  pub git_tag:            Option<String>,
  pub git_repo_url:       Option<String>,
  pub git_ref:            Option<String>,
  pub pr_number:          Option<u32>,
  pub pr_title:           Option<String>,
  pub pr_source_branch:   Option<String>,
  pub pr_target_branch:   Option<String>,
  pub started_at:         DateTime<Utc>,
  pub completed_at:       Option<DateTime<Utc>>,
  #[serde(default)]
  pub duration_ms:        u32,
  #[serde(default)]
  pub status:             CiRunStatus,
  pub conclusion:         Option<String>,
  pub error_message:      Option<String>,
  #[serde(default)]
  pub trace_ids:          Vec<String>,
  #[serde(default)]
  pub total_cost:         f64,
  #[serde(default)]
  pub total_tokens:       u64,
  #[serde(default)]
  pub total_observations: u64,
  pub runner_name:        Option<String>,
  pub runner_os:          Option<String>,
  pub runner_arch:        Option<String>,
  pub triggered_by:       Option<String>,
  pub trigger_event:      Option<String>,
  #[serde(default = "Utc::now")]
  pub created_at:         DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:         DateTime<Utc>,
}

impl CiRun {
  pub fn new(
    project_id: Uuid,
    provider: CiProvider,
    provider_run_id: impl Into<String>,
    started_at: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      project_id,
      provider,
      provider_run_id: provider_run_id.into(),
      provider_run_url: None,
      pipeline_name: None,
      job_name: None,
      workflow_name: None,
      git_commit_sha: None,
      git_branch: None,
      git_tag: None,
      git_repo_url: None,
      git_ref: None,
      pr_number: None,
      pr_title: None,
      pr_source_branch: None,
      pr_target_branch: None,
      started_at,
      completed_at: None,
      duration_ms: 0,
      status: CiRunStatus::Pending,
      conclusion: None,
      error_message: None,
      trace_ids: Vec::new(),
      total_cost: 0.0,
      total_tokens: 0,
      total_observations: 0,
      runner_name: None,
      runner_os: None,
      runner_arch: None,
      triggered_by: None,
      trigger_event: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn trace_count(&self) -> usize { self.trace_ids.len() }

  /// Record a trace as part of this run; duplicates are ignored.
  pub fn link_trace(&mut self, trace_id: impl Into<String>) {
    let trace_id = trace_id.into();
    if !self.trace_ids.contains(&trace_id) {
      self.trace_ids.push(trace_id);
    }
  }
}

impl Record for CiRun {
  type Id = Uuid;

  const TABLE: &'static Table = &CI_RUNS;

  fn id(&self) -> Uuid { self.id }

  fn project_id(&self) -> Uuid { self.project_id }

  fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn to_row(&self) -> Row {
    let mut row = Row::new();
    row
      .set(ID, self.id)
      .set(PROJECT_ID, self.project_id)
      .set("provider", self.provider.as_ref())
      .set("provider_run_id", &self.provider_run_id)
      .set("provider_run_url", self.provider_run_url.as_deref())
      .set("pipeline_name", self.pipeline_name.as_deref())
      .set("job_name", self.job_name.as_deref())
      .set("workflow_name", self.workflow_name.as_deref())
      .set("git_commit_sha", self.git_commit_sha.as_deref())
      .set("git_branch", self.git_branch.as_deref())
      .set("git_tag", self.git_tag.as_deref())
      .set("git_repo_url", self.git_repo_url.as_deref())
      .set("git_ref", self.git_ref.as_deref())
      .set("pr_number", self.pr_number)
      .set("pr_title", self.pr_title.as_deref())
      .set("pr_source_branch", self.pr_source_branch.as_deref())
      .set("pr_target_branch", self.pr_target_branch.as_deref())
      .set("started_at", self.started_at)
      .set("completed_at", self.completed_at)
      .set("duration_ms", self.duration_ms)
      .set("status", self.status.as_ref())
      .set("conclusion", self.conclusion.as_deref())
      .set("error_message", self.error_message.as_deref())
      .set("trace_ids", self.trace_ids.as_slice())
      .set("trace_count", self.trace_count() as u64)
      .set("total_cost", self.total_cost)
      .set("total_tokens", self.total_tokens)
      .set("total_observations", self.total_observations)
      .set("runner_name", self.runner_name.as_deref())
      .set("runner_os", self.runner_os.as_deref())
      .set("runner_arch", self.runner_arch.as_deref())
      .set("triggered_by", self.triggered_by.as_deref())
      .set("trigger_event", self.trigger_event.as_deref())
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    Ok(Self {
      id:                 row.uuid(ID)?,
      project_id:         row.uuid(PROJECT_ID)?,
      provider:           row.parse("provider")?,
      provider_run_id:    row.text("provider_run_id")?,
      provider_run_url:   row.opt_text("provider_run_url")?,
      pipeline_name:      row.opt_text("pipeline_name")?,
      job_name:           row.opt_text("job_name")?,
      workflow_name:      row.opt_text("workflow_name")?,
      git_commit_sha:     row.opt_text("git_commit_sha")?,
      git_branch:         row.opt_text("git_branch")?,
      git_tag:            row.opt_text("git_tag")?,
      git_repo_url:       row.opt_text("git_repo_url")?,
      git_ref:            row.opt_text("git_ref")?,
      pr_number:          row.opt_uint("pr_number")?,
      pr_title:           row.opt_text("pr_title")?,
      pr_source_branch:   row.opt_text("pr_source_branch")?,
      pr_target_branch:   row.opt_text("pr_target_branch")?,
      started_at:         row.timestamp("started_at")?,
      completed_at:       row.opt_timestamp("completed_at")?,
      duration_ms:        row.uint("duration_ms")?,
      status:             row.parse("status")?,
      conclusion:         row.opt_text("conclusion")?,
      error_message:      row.opt_text("error_message")?,
      trace_ids:          row.list("trace_ids")?,
      total_cost:         row.float("total_cost")?,
      total_tokens:       row.uint("total_tokens")?,
      total_observations: row.uint("total_observations")?,
      runner_name:        row.opt_text("runner_name")?,
      runner_os:          row.opt_text("runner_os")?,
      runner_arch:        row.opt_text("runner_arch")?,
      triggered_by:       row.opt_text("triggered_by")?,
      trigger_event:      row.opt_text("trigger_event")?,
      created_at:         row.timestamp(CREATED_AT)?,
      updated_at:         row.timestamp(UPDATED_AT)?,
    })
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CiRunFilter {
  pub project_id:      Uuid,
  pub provider:        Option<CiProvider>,
  pub provider_run_id: Option<String>,
  pub status:          Option<CiRunStatus>,
  pub git_branch:      Option<String>,
  pub git_commit_sha:  Option<String>,
  pub pr_number:       Option<u32>,
  /// Runs linked to any of these traces.
  pub trace_ids:       Vec<String>,
  pub from_time:       Option<DateTime<Utc>>,
  pub to_time:         Option<DateTime<Utc>>,
}

impl CiRunFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }
}

impl Filter for CiRunFilter {
  type Record = CiRun;

  fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .eq_opt("provider", self.provider.map(|p| p.as_ref().to_owned()))
        .eq_opt("provider_run_id", self.provider_run_id.as_deref())
        .eq_opt("status", self.status.map(|s| s.as_ref().to_owned()))
        .eq_opt("git_branch", self.git_branch.as_deref())
        .eq_opt("git_commit_sha", self.git_commit_sha.as_deref())
        .eq_opt("pr_number", self.pr_number)
        .any_of("trace_ids", &self.trace_ids)
        .between("started_at", self.from_time, self.to_time),
    )
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CiRunStats {
  pub total:           u64,
  pub succeeded:       u64,
  pub failed:          u64,
  pub cancelled:       u64,
  pub avg_duration_ms: f64,
  pub total_cost:      f64,
  pub total_tokens:    u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_round_trip_preserves_fields() {
    let mut run = CiRun::new(
      Uuid::new_v4(),
      CiProvider::GithubActions,
      "12345",
      Utc::now(),
    );
    run.pr_number = Some(42);
    run.status = CiRunStatus::Success;
    run.link_trace("t-1");
    run.link_trace("t-2");
    run.link_trace("t-1");
    assert_eq!(run.trace_count(), 2);
    assert_eq!(CiRun::from_row(run.to_row()).unwrap(), run);
  }

  #[test]
  fn provider_names_are_snake_case() {
    assert_eq!(CiProvider::GithubActions.as_ref(), "github_actions");
    assert_eq!(CiProvider::AzureDevops.as_ref(), "azure_devops");
    assert!(CiRunStatus::Cancelled.is_finished());
    assert!(!CiRunStatus::Running.is_finished());
  }
}
