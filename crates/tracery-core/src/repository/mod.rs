//! Entity repositories over a [`RowStore`].
//!
//! [`Repository`] carries the operations every entity shares: create, batch
//! create, tenant-scoped point lookup, filtered listing with a has-more lookahead,
//! update-as-insert, and the retention and tenant purges. Each entity module
//! adds its own queries in an inherent impl on its alias.

mod checkpoint;
mod ci_run;
mod file_operation;
mod git_link;
mod observation;
mod score;
mod session;
mod terminal_command;
mod trace;

use std::{marker::PhantomData, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  model::{
    checkpoint::Checkpoint, ci_run::CiRun, file_operation::FileOperation,
    git_link::GitLink, observation::Observation, score::Score,
    terminal_command::TerminalCommand, trace::Trace,
  },
  page::{Page, PageRequest},
  predicate::{OrderBy, Predicate, Select},
  record::{Filter, Record},
  row::ID,
  store::RowStore,
  sweeper::{self, Mode, TableSweep},
};

pub use session::SessionRepository;

pub type TraceRepository<S> = Repository<S, Trace>;
pub type ObservationRepository<S> = Repository<S, Observation>;
pub type ScoreRepository<S> = Repository<S, Score>;
pub type CheckpointRepository<S> = Repository<S, Checkpoint>;
pub type GitLinkRepository<S> = Repository<S, GitLink>;
pub type FileOperationRepository<S> = Repository<S, FileOperation>;
pub type TerminalCommandRepository<S> = Repository<S, TerminalCommand>;
pub type CiRunRepository<S> = Repository<S, CiRun>;

/// Typed access to one entity's table.
///
/// Cloning is cheap; the store is shared.
pub struct Repository<S, R> {
  store:   Arc<S>,
  _record: PhantomData<fn() -> R>,
}

impl<S, R> Clone for Repository<S, R> {
  fn clone(&self) -> Self {
    Self {
      store:   Arc::clone(&self.store),
      _record: PhantomData,
    }
  }
}

impl<S: RowStore, R: Record> Repository<S, R> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      _record: PhantomData,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Persist one record.
  #[instrument(skip_all, fields(table = R::TABLE.name, id = %record.id()))]
  pub async fn create(&self, record: &R) -> Result<()> {
    record.validate()?;
    self
      .store
      .insert(R::TABLE, record.to_row())
      .await
      .inspect_err(|e| warn!(error = %e, "insert failed"))
  }

  /// Persist records as one unit. An empty slice is a no-op.
  #[instrument(skip_all, fields(table = R::TABLE.name, rows = records.len()))]
  pub async fn create_batch(&self, records: &[R]) -> Result<()> {
    if records.is_empty() {
      debug!("empty batch, nothing to insert");
      return Ok(());
    }
    records.iter().try_for_each(R::validate)?;
    let rows = records.iter().map(R::to_row).collect();
    self
      .store
      .insert_batch(R::TABLE, rows)
      .await
      .inspect_err(|e| warn!(error = %e, "batch insert failed"))
  }

  /// Fetch the live version of one record.
  ///
  /// A record stored under another project is reported as not found.
  pub async fn get_by_id(&self, project_id: Uuid, id: &R::Id) -> Result<R> {
    let predicate = Predicate::for_project(project_id)?.eq(ID, id.clone());
    match self.store.query_one(R::TABLE, predicate).await? {
      Some(row) => R::from_row(row),
      None => Err(Error::not_found(R::TABLE.entity, id)),
    }
  }

  /// One page of records matching `filter`, plus the total match count.
  #[instrument(skip_all, fields(table = R::TABLE.name, offset = page.offset))]
  pub async fn list<F>(&self, filter: &F, page: PageRequest) -> Result<Page<R>>
  where
    F: Filter<Record = R>,
  {
    let predicate = filter.predicate()?;
    predicate.check_columns(R::TABLE)?;

    let total = self.store.count(R::TABLE, predicate.clone()).await?;
    let select = Select::new(predicate)
      .order(filter.order())
      .limit(page.lookahead_limit())
      .offset(u64::from(page.offset));
    let items = self.fetch(select).await?;

    debug!(total, returned = items.len(), "listed");
    Ok(Page::from_lookahead(items, &page, total))
  }

  /// Write a new version of `record`, stamping `updated_at`.
  ///
  /// The stamp is the current time or, when the record's version is already
  /// ahead of the clock, one nanosecond past it, so the new version always
  /// wins. Readers see it immediately; the superseded one is removed at
  /// compaction.
  pub async fn update(&self, record: &mut R) -> Result<()> {
    let next = record.updated_at() + Duration::nanoseconds(1);
    record.touch(Utc::now().max(next));
    self.create(record).await
  }

  pub async fn count_before_cutoff(
    &self,
    project_id: Uuid,
    cutoff: DateTime<Utc>,
  ) -> Result<u64> {
    let predicate = sweeper::cutoff_predicate(project_id, cutoff)?;
    self.store.count(R::TABLE, predicate).await
  }

  /// Delete records created before `cutoff`. Issues nothing when none match.
  pub async fn delete_before_cutoff(
    &self,
    project_id: Uuid,
    cutoff: DateTime<Utc>,
  ) -> Result<TableSweep> {
    let predicate = sweeper::cutoff_predicate(project_id, cutoff)?;
    sweeper::sweep_table(&*self.store, R::TABLE, predicate, Mode::Execute).await
  }

  /// Delete every record of one project.
  pub async fn delete_by_project(&self, project_id: Uuid) -> Result<TableSweep> {
    let predicate = Predicate::for_project(project_id)?;
    sweeper::sweep_table(&*self.store, R::TABLE, predicate, Mode::Execute).await
  }

  pub(crate) async fn fetch(&self, select: Select) -> Result<Vec<R>> {
    self
      .store
      .query_many(R::TABLE, select)
      .await?
      .into_iter()
      .map(R::from_row)
      .collect()
  }

  /// All records of one trace, for child entities.
  pub(crate) async fn by_trace(
    &self,
    project_id: Uuid,
    trace_id: &str,
    order: &[OrderBy],
  ) -> Result<Vec<R>> {
    let column = R::TABLE.trace_column.ok_or_else(|| {
      Error::InvalidArgument(format!("{} has no trace column", R::TABLE.name))
    })?;
    let predicate = Predicate::for_project(project_id)?.eq(column, trace_id);
    self
      .fetch(Select::new(predicate).order(order.iter().copied()))
      .await
  }

  /// Child records whose trace no longer exists.
  pub async fn count_orphans(&self, project_id: Option<Uuid>) -> Result<u64> {
    let predicate = sweeper::orphan_predicate(R::TABLE, project_id)?;
    self.store.count(R::TABLE, predicate).await
  }

  /// Delete orphaned child records. The orphan set is recounted here, not
  /// taken from an earlier [`count_orphans`](Self::count_orphans).
  pub async fn delete_orphans(&self, project_id: Option<Uuid>) -> Result<TableSweep> {
    let predicate = sweeper::orphan_predicate(R::TABLE, project_id)?;
    sweeper::sweep_table(&*self.store, R::TABLE, predicate, Mode::Execute).await
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::{
    model::{
      observation::ObservationType,
      score::ScoreValue,
      trace::TraceFilter,
    },
    sweeper::Purge,
    testing::MemoryStore,
  };

  fn traces() -> (Arc<MemoryStore>, TraceRepository<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    (Arc::clone(&store), Repository::new(store))
  }

  #[tokio::test]
  async fn create_then_get() {
    let (_, repo) = traces();
    let project = Uuid::new_v4();
    let trace = Trace::new(project, "t-1", "run", Utc::now());
    repo.create(&trace).await.unwrap();

    let fetched = repo.get_by_id(project, &"t-1".to_owned()).await.unwrap();
    assert_eq!(fetched, trace);
  }

  #[tokio::test]
  async fn get_under_other_project_is_not_found() {
    let (_, repo) = traces();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    repo
      .create(&Trace::new(a, "t-1", "run", Utc::now()))
      .await
      .unwrap();

    let err = repo.get_by_id(b, &"t-1".to_owned()).await.unwrap_err();
    assert!(err.is_not_found());
  }

  #[tokio::test]
  async fn update_replaces_visible_version() {
    let (_, repo) = traces();
    let project = Uuid::new_v4();
    let mut trace = Trace::new(project, "t-1", "draft", Utc::now());
    repo.create(&trace).await.unwrap();

    trace.name = "final".into();
    repo.update(&mut trace).await.unwrap();

    let page = repo
      .list(&TraceFilter::new(project), PageRequest::default())
      .await
      .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].name, "final");
  }

  #[tokio::test]
  async fn update_outranks_a_future_dated_version() {
    let (_, repo) = traces();
    let project = Uuid::new_v4();
    let mut trace = Trace::new(project, "t-1", "run", Utc::now());
    trace.updated_at = Utc::now() + Duration::hours(1);
    repo.create(&trace).await.unwrap();

    let updated = repo.set_bookmark(project, "t-1", true).await.unwrap();
    assert!(updated.updated_at > trace.updated_at);
    let fetched = repo.get_by_id(project, &"t-1".to_owned()).await.unwrap();
    assert!(fetched.bookmarked);
  }

  #[tokio::test]
  async fn trace_ending_before_it_starts_is_rejected() {
    let (store, repo) = traces();
    let project = Uuid::new_v4();
    let now = Utc::now();
    let mut bad = Trace::new(project, "bad", "run", now);
    bad.end_time = Some(now - Duration::seconds(5));

    let err = repo.create(&bad).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!err.is_transient());

    let good = Trace::new(project, "good", "run", now);
    let err = repo.create_batch(&[good, bad]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(store.live_ids(Trace::TABLE).is_empty());
  }

  #[tokio::test]
  async fn non_finite_score_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let repo: ScoreRepository<_> = Repository::new(Arc::clone(&store));
    let project = Uuid::new_v4();
    for value in [f64::NAN, f64::INFINITY] {
      let score = Score::new(project, "t-1", "q", ScoreValue::Numeric(value));
      let err = repo.create(&score).await.unwrap_err();
      assert!(matches!(err, Error::InvalidArgument(_)));
    }
    let fine = Score::new(project, "t-1", "q", ScoreValue::Numeric(0.5));
    repo.create(&fine).await.unwrap();
    assert_eq!(store.live_ids(Score::TABLE), vec![fine.id.to_string()]);
  }

  #[tokio::test]
  async fn empty_batch_is_a_noop() {
    let (store, repo) = traces();
    store.reject_batches_for(Trace::TABLE);
    repo.create_batch(&[]).await.unwrap();
  }

  #[tokio::test]
  async fn rejected_batch_surfaces_error() {
    let (store, repo) = traces();
    store.reject_batches_for(Trace::TABLE);
    let project = Uuid::new_v4();
    let batch = vec![
      Trace::new(project, "a", "a", Utc::now()),
      Trace::new(project, "b", "b", Utc::now()),
    ];
    let err = repo.create_batch(&batch).await.unwrap_err();
    assert!(matches!(err, Error::BatchRejected { rows: 2, .. }));
    assert!(store.live_ids(Trace::TABLE).is_empty());
  }

  #[tokio::test]
  async fn list_looks_ahead_for_more() {
    let (_, repo) = traces();
    let project = Uuid::new_v4();
    let start = Utc::now();
    let batch: Vec<Trace> = (0..5)
      .map(|i| {
        Trace::new(project, format!("t-{i}"), "run", start + Duration::seconds(i))
      })
      .collect();
    repo.create_batch(&batch).await.unwrap();

    let filter = TraceFilter::new(project);
    let first = repo.list(&filter, PageRequest::new(2, 0)).await.unwrap();
    assert_eq!(first.total, 5);
    assert!(first.has_more);
    // Newest first.
    assert_eq!(first.items[0].id, "t-4");

    let last = repo.list(&filter, PageRequest::new(2, 4)).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more);
  }

  #[tokio::test]
  async fn list_with_nil_project_fails() {
    let (_, repo) = traces();
    let result = repo
      .list(&TraceFilter::default(), PageRequest::default())
      .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
  }

  #[tokio::test]
  async fn delete_before_cutoff_skips_when_empty() {
    let (store, repo) = traces();
    let project = Uuid::new_v4();
    let sweep = repo
      .delete_before_cutoff(project, Utc::now())
      .await
      .unwrap();
    assert_eq!(sweep.purge, Purge::Noop);
    assert_eq!(store.deletes(), 0);
  }

  #[tokio::test]
  async fn orphans_are_counted_per_child_table() {
    let store = Arc::new(MemoryStore::default());
    let scores: ScoreRepository<_> = Repository::new(Arc::clone(&store));
    let observations: ObservationRepository<_> = Repository::new(Arc::clone(&store));
    let project = Uuid::new_v4();

    store
      .insert_record(&Trace::new(project, "t-1", "run", Utc::now()))
      .await;
    scores
      .create(&Score::new(project, "t-1", "ok", ScoreValue::Boolean(true)))
      .await
      .unwrap();
    scores
      .create(&Score::new(project, "gone", "ok", ScoreValue::Boolean(true)))
      .await
      .unwrap();
    observations
      .create(&Observation::new(
        project,
        "gone",
        "o-1",
        ObservationType::Event,
        Utc::now(),
      ))
      .await
      .unwrap();

    assert_eq!(scores.count_orphans(Some(project)).await.unwrap(), 1);
    let sweep = scores.delete_orphans(Some(project)).await.unwrap();
    assert_eq!(sweep.purge, Purge::Scheduled);
    assert_eq!(scores.count_orphans(Some(project)).await.unwrap(), 0);
    assert_eq!(observations.count_orphans(None).await.unwrap(), 1);
  }

  #[tokio::test]
  async fn orphan_count_on_root_table_is_rejected() {
    let (_, repo) = traces();
    assert!(repo.count_orphans(None).await.is_err());
  }
}
