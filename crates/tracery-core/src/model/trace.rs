//! Traces: the root entity of one agent execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Level, check_span, elapsed_ms};
use crate::{
  Result,
  predicate::{OrderBy, Predicate, RangeOp},
  record::{Filter, Record},
  row::{
    CREATED_AT, ColumnKind as K, ID, PROJECT_ID, Row, Table, UPDATED_AT, col,
  },
};

pub static TRACES: Table = Table {
  name:          "traces",
  entity:        "trace",
  columns:       &[
    col(ID, K::Text),
    col(PROJECT_ID, K::Uuid),
    col("name", K::Text),
    col("user_id", K::Text),
    col("session_id", K::Text),
    col("release", K::Text),
    col("version", K::Text),
    col("tags", K::List),
    col("metadata", K::Text),
    col("public", K::Bool),
    col("bookmarked", K::Bool),
    col("start_time", K::Timestamp),
    col("end_time", K::Timestamp),
    col("duration_ms", K::Float),
    col("input", K::Text),
    col("output", K::Text),
    col("level", K::Text),
    col("status_message", K::Text),
    col("total_cost", K::Float),
    col("input_cost", K::Float),
    col("output_cost", K::Float),
    col("total_tokens", K::Int),
    col("input_tokens", K::Int),
    col("output_tokens", K::Int),
    col("git_commit_sha", K::Text),
    col("git_branch", K::Text),
    col("git_repo_url", K::Text),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  None,
  default_order: &[OrderBy::desc("start_time")],
  sortable:      &[
    "start_time",
    "end_time",
    "duration_ms",
    "total_cost",
    "name",
    "level",
    CREATED_AT,
  ],
};

/// Columns the free-text search looks at.
const SEARCH_COLUMNS: &[&str] = &["name", "input", "output"];

/// One agent execution.
///
/// `user_id`, `session_id`, `release` and `version` are empty when unknown;
/// traces with an empty `session_id` belong to no session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
  pub id:             String,
  pub project_id:     Uuid,
  pub name:           String,
  #[serde(default)]
  pub user_id:        String,
  #[serde(default)]
  pub session_id:     String,
  #[serde(default)]
  pub release:        String,
  #[serde(default)]
  pub version:        String,
  #[serde(default)]
  pub tags:           Vec<String>,
  #[serde(default)]
  pub metadata:       serde_json::Value,
  #[serde(default)]
  pub public:         bool,
  #[serde(default)]
  pub bookmarked:     bool,
  pub start_time:     DateTime<Utc>,
  pub end_time:       Option<DateTime<Utc>>,
  #[serde(default)]
  pub input:          serde_json::Value,
  #[serde(default)]
  pub output:         serde_json::Value,
  #[serde(default)]
  pub level:          Level,
  #[serde(default)]
  pub status_message: String,
  #[serde(default)]
  pub total_cost:     f64,
  #[serde(default)]
  pub input_cost:     f64,
  #[serde(default)]
  pub output_cost:    f64,
  #[serde(default)]
  pub total_tokens:   u64,
  #[serde(default)]
  pub input_tokens:   u64,
  #[serde(default)]
  pub output_tokens:  u64,
  pub git_commit_sha: Option<String>,
  pub git_branch:     Option<String>,
  pub git_repo_url:   Option<String>,
  #[serde(default = "Utc::now")]
  pub created_at:     DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:     DateTime<Utc>,
}

impl Trace {
  pub fn new(
    project_id: Uuid,
    id: impl Into<String>,
    name: impl Into<String>,
    start_time: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      project_id,
      name: name.into(),
      user_id: String::new(),
      session_id: String::new(),
      release: String::new(),
      version: String::new(),
      tags: Vec::new(),
      metadata: serde_json::Value::Null,
      public: false,
      bookmarked: false,
      start_time,
      end_time: None,
      input: serde_json::Value::Null,
      output: serde_json::Value::Null,
      level: Level::Default,
      status_message: String::new(),
      total_cost: 0.0,
      input_cost: 0.0,
      output_cost: 0.0,
      total_tokens: 0,
      input_tokens: 0,
      output_tokens: 0,
      git_commit_sha: None,
      git_branch: None,
      git_repo_url: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// Wall-clock duration; 0 while the trace is still open.
  pub fn duration_ms(&self) -> f64 { elapsed_ms(self.start_time, self.end_time) }

  pub fn is_error(&self) -> bool { self.level == Level::Error }

  /// Overwrite cost and token totals with those summed from observations.
  pub fn apply_rollup(&mut self, rollup: &TraceRollup) {
    self.input_cost = rollup.input_cost;
    self.output_cost = rollup.output_cost;
    self.total_cost = rollup.total_cost;
    self.input_tokens = rollup.input_tokens;
    self.output_tokens = rollup.output_tokens;
    self.total_tokens = rollup.total_tokens;
  }
}

/// Cost and usage summed over a trace's observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TraceRollup {
  pub observations:  u64,
  pub input_cost:    f64,
  pub output_cost:   f64,
  pub total_cost:    f64,
  pub input_tokens:  u64,
  pub output_tokens: u64,
  pub total_tokens:  u64,
}

impl Record for Trace {
  type Id = String;

  const TABLE: &'static Table = &TRACES;

  fn id(&self) -> String { self.id.clone() }

  fn project_id(&self) -> Uuid { self.project_id }

  fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn validate(&self) -> Result<()> {
    check_span("trace", &self.id, self.start_time, self.end_time)
  }

  fn to_row(&self) -> Row {
    let mut row = Row::new();
    row
      .set(ID, &self.id)
      .set(PROJECT_ID, self.project_id)
      .set("name", &self.name)
      .set("user_id", &self.user_id)
      .set("session_id", &self.session_id)
      .set("release", &self.release)
      .set("version", &self.version)
      .set("tags", self.tags.as_slice())
      .set("metadata", &self.metadata)
      .set("public", self.public)
      .set("bookmarked", self.bookmarked)
      .set("start_time", self.start_time)
      .set("end_time", self.end_time)
      .set("duration_ms", self.duration_ms())
      .set("input", &self.input)
      .set("output", &self.output)
      .set("level", self.level.as_ref())
      .set("status_message", &self.status_message)
      .set("total_cost", self.total_cost)
      .set("input_cost", self.input_cost)
      .set("output_cost", self.output_cost)
      .set("total_tokens", self.total_tokens)
      .set("input_tokens", self.input_tokens)
      .set("output_tokens", self.output_tokens)
      .set("git_commit_sha", self.git_commit_sha.as_deref())
      .set("git_branch", self.git_branch.as_deref())
      .set("git_repo_url", self.git_repo_url.as_deref())
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    Ok(Self {
      id:             row.text(ID)?,
      project_id:     row.uuid(PROJECT_ID)?,
      name:           row.text("name")?,
      user_id:        row.text("user_id")?,
      session_id:     row.text("session_id")?,
      release:        row.text("release")?,
      version:        row.text("version")?,
      tags:           row.list("tags")?,
      metadata:       row.json("metadata")?,
      public:         row.bool("public")?,
      bookmarked:     row.bool("bookmarked")?,
      start_time:     row.timestamp("start_time")?,
      end_time:       row.opt_timestamp("end_time")?,
      input:          row.json("input")?,
      output:         row.json("output")?,
      level:          row.parse("level")?,
      status_message: row.text("status_message")?,
      total_cost:     row.float("total_cost")?,
      input_cost:     row.float("input_cost")?,
      output_cost:    row.float("output_cost")?,
      total_tokens:   row.uint("total_tokens")?,
      input_tokens:   row.uint("input_tokens")?,
      output_tokens:  row.uint("output_tokens")?,
      git_commit_sha: row.opt_text("git_commit_sha")?,
      git_branch:     row.opt_text("git_branch")?,
      git_repo_url:   row.opt_text("git_repo_url")?,
      created_at:     row.timestamp(CREATED_AT)?,
      updated_at:     row.timestamp(UPDATED_AT)?,
    })
  }
}

// ─── Filter ──────────────────────────────────────────────────────────────────

/// Criteria for listing traces. Every field except `project_id` is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceFilter {
  pub project_id:      Uuid,
  pub ids:             Vec<String>,
  pub user_id:         Option<String>,
  pub session_id:      Option<String>,
  /// Substring of the trace name.
  pub name:            Option<String>,
  pub release:         Option<String>,
  pub version:         Option<String>,
  /// Matches traces carrying any of these tags.
  pub tags:            Vec<String>,
  pub level:           Option<Level>,
  pub from_time:       Option<DateTime<Utc>>,
  pub to_time:         Option<DateTime<Utc>>,
  pub bookmarked:      Option<bool>,
  pub has_error:       Option<bool>,
  pub min_cost:        Option<f64>,
  pub max_cost:        Option<f64>,
  pub min_duration_ms: Option<f64>,
  pub max_duration_ms: Option<f64>,
  /// Substring of the name, input or output.
  pub search:          Option<String>,
  pub git_commit_sha:  Option<String>,
  pub git_branch:      Option<String>,
  pub git_repo_url:    Option<String>,
  #[serde(skip)]
  pub order_by:        Option<OrderBy>,
}

impl TraceFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }

  /// Order by a whitelisted column name.
  pub fn order_by(mut self, column: &str, descending: bool) -> Result<Self> {
    self.order_by = Some(OrderBy::parse(&TRACES, column, descending)?);
    Ok(self)
  }
}

impl Filter for TraceFilter {
  type Record = Trace;

  fn predicate(&self) -> Result<Predicate> {
    let mut predicate = Predicate::for_project(self.project_id)?
      .in_list(ID, self.ids.iter())
      .eq_opt("user_id", self.user_id.as_deref())
      .eq_opt("session_id", self.session_id.as_deref())
      .contains("name", self.name.as_deref())
      .eq_opt("release", self.release.as_deref())
      .eq_opt("version", self.version.as_deref())
      .any_of("tags", &self.tags)
      .eq_opt("level", self.level.map(|l| l.as_ref().to_owned()))
      .between("start_time", self.from_time, self.to_time)
      .eq_opt("bookmarked", self.bookmarked)
      .range_opt("total_cost", RangeOp::Gte, self.min_cost)
      .range_opt("total_cost", RangeOp::Lte, self.max_cost)
      .range_opt("duration_ms", RangeOp::Gte, self.min_duration_ms)
      .range_opt("duration_ms", RangeOp::Lte, self.max_duration_ms)
      .search(SEARCH_COLUMNS, self.search.as_deref())
      .eq_opt("git_commit_sha", self.git_commit_sha.as_deref())
      .eq_opt("git_branch", self.git_branch.as_deref())
      .eq_opt("git_repo_url", self.git_repo_url.as_deref());

    predicate = match self.has_error {
      Some(true) => predicate.eq("level", Level::Error.as_ref()),
      Some(false) => predicate.ne("level", Level::Error.as_ref()),
      None => predicate,
    };
    Ok(predicate)
  }

  fn order(&self) -> Vec<OrderBy> {
    match self.order_by {
      Some(order) => vec![order],
      None => TRACES.default_order.to_vec(),
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::predicate::Condition;

  #[test]
  fn rollup_replaces_totals() {
    let mut trace = Trace::new(Uuid::new_v4(), "t-1", "run", Utc::now());
    trace.total_cost = 9.0;
    trace.apply_rollup(&TraceRollup {
      observations:  2,
      input_cost:    0.25,
      output_cost:   0.5,
      total_cost:    0.75,
      input_tokens:  10,
      output_tokens: 20,
      total_tokens:  30,
    });
    assert_eq!(trace.total_cost, 0.75);
    assert_eq!(trace.total_tokens, 30);
    assert_eq!(trace.input_tokens, 10);
  }

  #[test]
  fn row_round_trip_preserves_fields() {
    let start = Utc::now();
    let mut trace = Trace::new(Uuid::new_v4(), "t-1", "agent run", start);
    trace.tags = vec!["ci".into(), "nightly".into()];
    trace.metadata = serde_json::json!({ "k": 1 });
    trace.end_time = Some(start + Duration::milliseconds(250));
    trace.git_branch = Some("main".into());
    trace.total_tokens = 42;

    let back = Trace::from_row(trace.to_row()).unwrap();
    assert_eq!(back, trace);
  }

  #[test]
  fn row_carries_derived_duration() {
    let start = Utc::now();
    let mut trace = Trace::new(Uuid::new_v4(), "t-1", "run", start);
    trace.end_time = Some(start + Duration::seconds(2));
    assert_eq!(
      trace.to_row().get("duration_ms"),
      Some(&crate::row::Value::Float(2000.0))
    );
  }

  #[test]
  fn has_error_maps_to_level() {
    let mut filter = TraceFilter::new(Uuid::new_v4());
    filter.has_error = Some(false);
    let predicate = filter.predicate().unwrap();
    assert!(matches!(
      predicate.conditions().last(),
      Some(Condition::NotEquals { column: "level", .. })
    ));
  }

  #[test]
  fn nil_project_filter_is_rejected() {
    assert!(TraceFilter::default().predicate().is_err());
  }

  #[test]
  fn order_by_rejects_unknown_columns() {
    let filter = TraceFilter::new(Uuid::new_v4());
    assert!(filter.clone().order_by("total_cost", true).is_ok());
    assert!(filter.order_by("metadata", true).is_err());
  }
}
