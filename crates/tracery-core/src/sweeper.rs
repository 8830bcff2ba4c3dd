//! Retention and integrity sweeps.
//!
//! Every purge counts first and only issues a delete when something matches,
//! so an empty sweep never schedules a mutation. Deletes are asynchronous in
//! the store's contract: a returned [`Purge::Scheduled`] says a delete was
//! issued for roughly `matched` rows, not that they are gone.
//!
//! Orphan purges never reuse an earlier count. The count and the delete are
//! issued back to back with the same predicate, which the store evaluates
//! against the traces live at delete time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
  Result,
  model::{
    checkpoint::CHECKPOINTS, ci_run::CI_RUNS, file_operation::FILE_OPERATIONS,
    git_link::GIT_LINKS, observation::OBSERVATIONS, score::SCORES,
    terminal_command::TERMINAL_COMMANDS, trace::TRACES,
  },
  predicate::{Predicate, RangeOp},
  row::{CREATED_AT, Table},
  store::RowStore,
};

/// Tables swept for retention and tenant purges. Children precede traces so
/// an interrupted sweep does not leave orphans behind.
pub static ALL_TABLES: [&Table; 8] = [
  &OBSERVATIONS,
  &SCORES,
  &CHECKPOINTS,
  &GIT_LINKS,
  &FILE_OPERATIONS,
  &TERMINAL_COMMANDS,
  &CI_RUNS,
  &TRACES,
];

/// Child tables with a single trace reference.
pub static ORPHAN_TABLES: [&Table; 6] = [
  &OBSERVATIONS,
  &SCORES,
  &CHECKPOINTS,
  &GIT_LINKS,
  &FILE_OPERATIONS,
  &TERMINAL_COMMANDS,
];

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Purge {
  /// Nothing matched; no delete was issued.
  Noop,
  /// Rows matched but this was a dry run.
  Counted,
  /// A delete was issued.
  Scheduled,
}

/// Outcome of a sweep over one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableSweep {
  pub table:   &'static str,
  /// Rows matching when counted. An estimate once a delete is scheduled.
  pub matched: u64,
  pub purge:   Purge,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
  pub tables: Vec<TableSweep>,
}

impl SweepReport {
  pub fn total_matched(&self) -> u64 { self.tables.iter().map(|t| t.matched).sum() }

  /// Whether any delete was issued.
  pub fn scheduled(&self) -> bool {
    self.tables.iter().any(|t| t.purge == Purge::Scheduled)
  }
}

// ─── Single-table primitives ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  DryRun,
  Execute,
}

/// Count the rows matching `predicate` and, in execute mode, delete them.
pub async fn sweep_table<S: RowStore>(
  store: &S,
  table: &'static Table,
  predicate: Predicate,
  mode: Mode,
) -> Result<TableSweep> {
  let matched = store.count(table, predicate.clone()).await?;
  if matched == 0 {
    debug!(table = table.name, "nothing to purge");
    return Ok(TableSweep {
      table: table.name,
      matched,
      purge: Purge::Noop,
    });
  }
  if mode == Mode::DryRun {
    return Ok(TableSweep {
      table: table.name,
      matched,
      purge: Purge::Counted,
    });
  }

  store.delete_where(table, predicate).await?;
  info!(table = table.name, estimated = matched, "purge scheduled");
  Ok(TableSweep {
    table: table.name,
    matched,
    purge: Purge::Scheduled,
  })
}

pub fn cutoff_predicate(
  project_id: Uuid,
  cutoff: DateTime<Utc>,
) -> Result<Predicate> {
  Ok(Predicate::for_project(project_id)?.range(CREATED_AT, RangeOp::Lt, cutoff))
}

/// Rows of `table` whose trace is gone, in one project or across all.
pub fn orphan_predicate(
  table: &'static Table,
  project_id: Option<Uuid>,
) -> Result<Predicate> {
  Predicate::scoped(project_id)?.orphaned(table, &TRACES)
}

// ─── Sweeper ─────────────────────────────────────────────────────────────────

/// Runs retention, orphan and tenant purges across every table.
pub struct Sweeper<S> {
  store: Arc<S>,
}

impl<S> Clone for Sweeper<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

impl<S: RowStore> Sweeper<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Purge (or count) rows created before `cutoff` in one project.
  #[instrument(skip(self))]
  pub async fn retention(
    &self,
    project_id: Uuid,
    cutoff: DateTime<Utc>,
    mode: Mode,
  ) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    for table in ALL_TABLES {
      let predicate = cutoff_predicate(project_id, cutoff)?;
      report
        .tables
        .push(sweep_table(&*self.store, table, predicate, mode).await?);
    }
    info!(matched = report.total_matched(), "retention sweep finished");
    Ok(report)
  }

  /// Purge (or count) child rows whose trace no longer exists.
  ///
  /// With no project the sweep spans every tenant.
  #[instrument(skip(self))]
  pub async fn orphans(
    &self,
    project_id: Option<Uuid>,
    mode: Mode,
  ) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    for table in ORPHAN_TABLES {
      let predicate = orphan_predicate(table, project_id)?;
      report
        .tables
        .push(sweep_table(&*self.store, table, predicate, mode).await?);
    }
    info!(matched = report.total_matched(), "orphan sweep finished");
    Ok(report)
  }

  /// Remove every row belonging to one project.
  #[instrument(skip(self))]
  pub async fn purge_project(
    &self,
    project_id: Uuid,
    mode: Mode,
  ) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    for table in ALL_TABLES {
      let predicate = Predicate::for_project(project_id)?;
      report
        .tables
        .push(sweep_table(&*self.store, table, predicate, mode).await?);
    }
    info!(matched = report.total_matched(), "tenant purge finished");
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::{
    model::{
      observation::{Observation, ObservationType},
      trace::Trace,
    },
    record::Record as _,
    testing::MemoryStore,
  };

  fn sweeper() -> (Arc<MemoryStore>, Sweeper<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    (Arc::clone(&store), Sweeper::new(store))
  }

  #[tokio::test]
  async fn empty_retention_issues_no_delete() {
    let (store, sweeper) = sweeper();
    let project = Uuid::new_v4();
    let trace = Trace::new(project, "t-1", "recent", Utc::now());
    store.insert_record(&trace).await;

    let report = sweeper
      .retention(project, Utc::now() - Duration::days(30), Mode::Execute)
      .await
      .unwrap();

    assert_eq!(report.total_matched(), 0);
    assert!(!report.scheduled());
    assert!(report.tables.iter().all(|t| t.purge == Purge::Noop));
    assert_eq!(store.deletes(), 0);
  }

  #[tokio::test]
  async fn retention_deletes_only_old_rows() {
    let (store, sweeper) = sweeper();
    let project = Uuid::new_v4();
    let mut old = Trace::new(project, "old", "old", Utc::now());
    old.created_at = Utc::now() - Duration::days(90);
    let fresh = Trace::new(project, "fresh", "fresh", Utc::now());
    store.insert_record(&old).await;
    store.insert_record(&fresh).await;

    let report = sweeper
      .retention(project, Utc::now() - Duration::days(30), Mode::Execute)
      .await
      .unwrap();

    let traces = report.tables.iter().find(|t| t.table == "traces").unwrap();
    assert_eq!(traces.matched, 1);
    assert_eq!(traces.purge, Purge::Scheduled);
    assert_eq!(store.deletes(), 1);
    assert_eq!(store.live_ids(Trace::TABLE), vec!["fresh".to_owned()]);
  }

  #[tokio::test]
  async fn dry_run_counts_without_deleting() {
    let (store, sweeper) = sweeper();
    let project = Uuid::new_v4();
    let obs = Observation::new(
      project,
      "missing",
      "o-1",
      ObservationType::Span,
      Utc::now(),
    );
    store.insert_record(&obs).await;

    let report = sweeper.orphans(Some(project), Mode::DryRun).await.unwrap();
    assert_eq!(report.total_matched(), 1);
    assert!(!report.scheduled());
    assert_eq!(store.deletes(), 0);
  }

  #[tokio::test]
  async fn orphans_respect_tenant_boundaries() {
    let (store, sweeper) = sweeper();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    // Trace exists in project A only; B's observation points at the same id.
    store
      .insert_record(&Trace::new(a, "t-1", "run", Utc::now()))
      .await;
    let in_a =
      Observation::new(a, "t-1", "o-a", ObservationType::Span, Utc::now());
    let in_b =
      Observation::new(b, "t-1", "o-b", ObservationType::Span, Utc::now());
    store.insert_record(&in_a).await;
    store.insert_record(&in_b).await;

    let report = sweeper.orphans(None, Mode::Execute).await.unwrap();
    assert_eq!(report.total_matched(), 1);
    assert_eq!(store.live_ids(Observation::TABLE), vec!["o-a".to_owned()]);
  }

  #[tokio::test]
  async fn purge_project_leaves_other_tenants() {
    let (store, sweeper) = sweeper();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    store.insert_record(&Trace::new(a, "ta", "a", Utc::now())).await;
    store.insert_record(&Trace::new(b, "tb", "b", Utc::now())).await;

    sweeper.purge_project(a, Mode::Execute).await.unwrap();
    assert_eq!(store.live_ids(Trace::TABLE), vec!["tb".to_owned()]);
  }

  #[test]
  fn nil_project_is_rejected() {
    assert!(cutoff_predicate(Uuid::nil(), Utc::now()).is_err());
  }
}
