//! Batched JSON-lines ingestion.
//!
//! Each input line is a single-key object naming the entity kind:
//!
//! ```text
//! {"trace": {"id": "t-1", "project_id": "…", "name": "run", "start_time": "…"}}
//! {"observation": {"id": "o-1", "trace_id": "t-1", …}}
//! ```
//!
//! Records are buffered per table and written `batch_size` at a time. Traces
//! are flushed before their children at the end of input.

use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _};
use tracery_core::{
  model::{
    checkpoint::Checkpoint, ci_run::CiRun, file_operation::FileOperation,
    git_link::GitLink, observation::Observation, score::Score,
    terminal_command::TerminalCommand, trace::Trace,
  },
  record::Record,
  repository::Repository,
};
use tracery_store_sqlite::SqliteStore;
use tracing::{debug, info};

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum Envelope {
  Trace(Trace),
  Observation(Observation),
  Score(Score),
  Checkpoint(Checkpoint),
  GitLink(GitLink),
  FileOperation(FileOperation),
  TerminalCommand(TerminalCommand),
  CiRun(CiRun),
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
  pub lines:   u64,
  pub records: u64,
  pub batches: u64,
}

// ─── Per-table buffer ────────────────────────────────────────────────────────

struct Buffer<R> {
  repo:    Repository<SqliteStore, R>,
  pending: Vec<R>,
}

impl<R: Record> Buffer<R> {
  fn new(store: &Arc<SqliteStore>) -> Self {
    Self {
      repo:    Repository::new(Arc::clone(store)),
      pending: Vec::new(),
    }
  }

  async fn push(
    &mut self,
    record: R,
    batch_size: usize,
    summary: &mut IngestSummary,
  ) -> anyhow::Result<()> {
    self.pending.push(record);
    if self.pending.len() >= batch_size {
      self.flush(summary).await?;
    }
    Ok(())
  }

  async fn flush(&mut self, summary: &mut IngestSummary) -> anyhow::Result<()> {
    if self.pending.is_empty() {
      return Ok(());
    }
    let table = R::TABLE.name;
    let rows = self.pending.len();
    self
      .repo
      .create_batch(&self.pending)
      .await
      .with_context(|| format!("failed to write {rows} rows into {table}"))?;
    debug!(table, rows, "batch written");
    summary.records += rows as u64;
    summary.batches += 1;
    self.pending.clear();
    Ok(())
  }
}

// ─── Ingest ──────────────────────────────────────────────────────────────────

pub struct Ingest {
  batch_size:        usize,
  summary:           IngestSummary,
  traces:            Buffer<Trace>,
  observations:      Buffer<Observation>,
  scores:            Buffer<Score>,
  checkpoints:       Buffer<Checkpoint>,
  git_links:         Buffer<GitLink>,
  file_operations:   Buffer<FileOperation>,
  terminal_commands: Buffer<TerminalCommand>,
  ci_runs:           Buffer<CiRun>,
}

impl Ingest {
  pub fn new(store: &Arc<SqliteStore>, batch_size: usize) -> Self {
    Self {
      batch_size:        batch_size.max(1),
      summary:           IngestSummary::default(),
      traces:            Buffer::new(store),
      observations:      Buffer::new(store),
      scores:            Buffer::new(store),
      checkpoints:       Buffer::new(store),
      git_links:         Buffer::new(store),
      file_operations:   Buffer::new(store),
      terminal_commands: Buffer::new(store),
      ci_runs:           Buffer::new(store),
    }
  }

  /// Consume `reader` to the end, writing every record it holds.
  ///
  /// Stops at the first malformed line or rejected batch. Batches already
  /// written stay written.
  pub async fn run<Rd>(mut self, reader: Rd) -> anyhow::Result<IngestSummary>
  where
    Rd: AsyncBufRead + Unpin,
  {
    let mut lines = reader.lines();
    let mut number = 0u64;
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
      number += 1;
      if line.trim().is_empty() {
        continue;
      }
      let envelope: Envelope = serde_json::from_str(&line)
        .with_context(|| format!("line {number} is not a valid record"))?;
      self.summary.lines += 1;
      self.push(envelope).await?;
    }
    self.flush_all().await?;
    info!(
      records = self.summary.records,
      batches = self.summary.batches,
      "ingest finished"
    );
    Ok(self.summary)
  }

  async fn push(&mut self, envelope: Envelope) -> anyhow::Result<()> {
    let n = self.batch_size;
    let summary = &mut self.summary;
    match envelope {
      Envelope::Trace(r) => self.traces.push(r, n, summary).await,
      Envelope::Observation(r) => self.observations.push(r, n, summary).await,
      Envelope::Score(r) => self.scores.push(r, n, summary).await,
      Envelope::Checkpoint(r) => self.checkpoints.push(r, n, summary).await,
      Envelope::GitLink(r) => self.git_links.push(r, n, summary).await,
      Envelope::FileOperation(r) => self.file_operations.push(r, n, summary).await,
      Envelope::TerminalCommand(r) => {
        self.terminal_commands.push(r, n, summary).await
      }
      Envelope::CiRun(r) => self.ci_runs.push(r, n, summary).await,
    }
  }

  async fn flush_all(&mut self) -> anyhow::Result<()> {
    let summary = &mut self.summary;
    self.traces.flush(summary).await?;
    self.observations.flush(summary).await?;
    self.scores.flush(summary).await?;
    self.checkpoints.flush(summary).await?;
    self.git_links.flush(summary).await?;
    self.file_operations.flush(summary).await?;
    self.terminal_commands.flush(summary).await?;
    self.ci_runs.flush(summary).await
  }
}
