//! Sessions: traces grouped by `session_id`.
//!
//! A session is never stored. It is derived from the live traces sharing a
//! non-empty `session_id` within a project, either by the store (see
//! [`SessionRepository`](crate::repository::SessionRepository)) or in memory
//! with [`aggregate_sessions`]. Both apply the same rules:
//!
//! - `user_id` is the greatest user id in the group
//! - `bookmarked` and `public` are true if any member trace is
//! - `created_at` is the earliest, `updated_at` the latest
//! - cost and token totals are sums, trace times are min and max of
//!   `start_time`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Result,
  model::trace::Trace,
  predicate::{Aggregate, GroupQuery, OrderBy, Predicate},
  row::{CREATED_AT, PROJECT_ID, Row, UPDATED_AT},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
  pub id:               String,
  pub project_id:       Uuid,
  pub user_id:          String,
  pub bookmarked:       bool,
  pub public:           bool,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
  pub trace_count:      u64,
  pub total_cost:       f64,
  pub total_tokens:     u64,
  pub first_trace_time: DateTime<Utc>,
  pub last_trace_time:  DateTime<Utc>,
}

impl Session {
  fn seed(trace: &Trace) -> Self {
    Self {
      id:               trace.session_id.clone(),
      project_id:       trace.project_id,
      user_id:          trace.user_id.clone(),
      bookmarked:       trace.bookmarked,
      public:           trace.public,
      created_at:       trace.created_at,
      updated_at:       trace.updated_at,
      trace_count:      1,
      total_cost:       trace.total_cost,
      total_tokens:     trace.total_tokens,
      first_trace_time: trace.start_time,
      last_trace_time:  trace.start_time,
    }
  }

  fn absorb(&mut self, trace: &Trace) {
    if trace.user_id > self.user_id {
      self.user_id.clone_from(&trace.user_id);
    }
    self.bookmarked |= trace.bookmarked;
    self.public |= trace.public;
    self.created_at = self.created_at.min(trace.created_at);
    self.updated_at = self.updated_at.max(trace.updated_at);
    self.trace_count += 1;
    self.total_cost += trace.total_cost;
    self.total_tokens += trace.total_tokens;
    self.first_trace_time = self.first_trace_time.min(trace.start_time);
    self.last_trace_time = self.last_trace_time.max(trace.start_time);
  }

  /// Wall-clock span from the first to the last trace start.
  pub fn span_ms(&self) -> i64 {
    (self.last_trace_time - self.first_trace_time).num_milliseconds()
  }
}

/// Fold traces into sessions, most recently active first.
///
/// Traces without a session are ignored. Sessions are keyed by
/// `(project_id, session_id)`, so equal session ids in different projects
/// stay apart.
pub fn aggregate_sessions<'a>(
  traces: impl IntoIterator<Item = &'a Trace>,
) -> Vec<Session> {
  let mut sessions: BTreeMap<(Uuid, &str), Session> = BTreeMap::new();
  for trace in traces {
    if trace.session_id.is_empty() {
      continue;
    }
    sessions
      .entry((trace.project_id, trace.session_id.as_str()))
      .and_modify(|s| s.absorb(trace))
      .or_insert_with(|| Session::seed(trace));
  }
  let mut out: Vec<Session> = sessions.into_values().collect();
  out.sort_by(|a, b| {
    b.last_trace_time
      .cmp(&a.last_trace_time)
      .then_with(|| a.id.cmp(&b.id))
  });
  out
}

// ─── Store-side aggregation ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
  pub project_id: Uuid,
  pub user_id:    Option<String>,
  /// Bounds on member trace start times.
  pub from_time:  Option<DateTime<Utc>>,
  pub to_time:    Option<DateTime<Utc>>,
}

impl SessionFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }

  /// Predicate over member traces.
  pub fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .ne("session_id", "")
        .eq_opt("user_id", self.user_id.as_deref())
        .between("start_time", self.from_time, self.to_time),
    )
  }
}

/// Grouped query computing one row per session.
pub(crate) fn session_query(predicate: Predicate) -> GroupQuery {
  GroupQuery::new(predicate)
    .group_by(PROJECT_ID)
    .group_by("session_id")
    .aggregate("user_id", Aggregate::Any("user_id"))
    .aggregate("bookmarked", Aggregate::Max("bookmarked"))
    .aggregate("public", Aggregate::Max("public"))
    .aggregate(CREATED_AT, Aggregate::Min(CREATED_AT))
    .aggregate(UPDATED_AT, Aggregate::Max(UPDATED_AT))
    .aggregate("trace_count", Aggregate::Count)
    .aggregate("total_cost", Aggregate::Sum("total_cost"))
    .aggregate("total_tokens", Aggregate::Sum("total_tokens"))
    .aggregate("first_trace_time", Aggregate::Min("start_time"))
    .aggregate("last_trace_time", Aggregate::Max("start_time"))
    .order([OrderBy::desc("last_trace_time"), OrderBy::asc("session_id")])
}

pub(crate) fn session_from_row(mut row: Row) -> Result<Session> {
  Ok(Session {
    id:               row.text("session_id")?,
    project_id:       row.uuid(PROJECT_ID)?,
    user_id:          row.opt_text("user_id")?.unwrap_or_default(),
    bookmarked:       row.bool("bookmarked")?,
    public:           row.bool("public")?,
    created_at:       row.timestamp(CREATED_AT)?,
    updated_at:       row.timestamp(UPDATED_AT)?,
    trace_count:      row.uint("trace_count")?,
    total_cost:       row.float("total_cost")?,
    total_tokens:     row.uint("total_tokens")?,
    first_trace_time: row.timestamp("first_trace_time")?,
    last_trace_time:  row.timestamp("last_trace_time")?,
  })
}
