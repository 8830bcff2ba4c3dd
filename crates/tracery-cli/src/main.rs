//! `tracery` operator binary.
//!
//! Reads `tracery.toml` (or the path given with `--config`) layered with
//! `TRACERY_*` environment variables, opens the SQLite store and runs one
//! command. Results are printed to stdout as JSON; logs go to stderr.
//!
//! ```
//! tracery ingest traces.jsonl
//! tracery traces --project 6f1c… --tag nightly --order-by total_cost --desc
//! tracery retention --project 6f1c… --days 30 --dry-run
//! ```

mod ingest;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration as StdDuration,
};

use anyhow::Context as _;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::io::BufReader;
use tracery_core::{
  hierarchy::ObservationForest,
  model::{Level, trace::TraceFilter},
  page::PageRequest,
  repository::{
    CiRunRepository, FileOperationRepository, GitLinkRepository,
    ObservationRepository, Repository, ScoreRepository, SessionRepository,
    TerminalCommandRepository, TraceRepository,
  },
  session::SessionFilter,
  sweeper::{Mode, Sweeper},
};
use tracery_store_sqlite::{SqliteStore, StoreOptions};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::ingest::Ingest;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Tracery trace store operations")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tracery.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Load JSON-lines records from a file, or stdin when omitted or `-`.
  Ingest { file: Option<PathBuf> },

  /// List traces.
  Traces {
    #[arg(long)]
    project:  Uuid,
    #[arg(long)]
    session:  Option<String>,
    #[arg(long)]
    user:     Option<String>,
    /// Substring of the trace name.
    #[arg(long)]
    name:     Option<String>,
    #[arg(long = "tag")]
    tags:     Vec<String>,
    #[arg(long)]
    level:    Option<Level>,
    /// Substring of the name, input or output.
    #[arg(long)]
    search:   Option<String>,
    #[arg(long)]
    order_by: Option<String>,
    #[arg(long)]
    desc:     bool,
    #[command(flatten)]
    page:     PageArgs,
  },

  /// Print the observation tree of one trace.
  Tree {
    #[arg(long)]
    project: Uuid,
    #[arg(long)]
    trace:   String,
  },

  /// Recompute a trace's cost and token totals from its observations.
  Rollup {
    #[arg(long)]
    project: Uuid,
    #[arg(long)]
    trace:   String,
  },

  /// List sessions.
  Sessions {
    #[arg(long)]
    project: Uuid,
    #[arg(long)]
    user:    Option<String>,
    #[command(flatten)]
    page:    PageArgs,
  },

  /// Distinct user ids seen in sessions.
  Users {
    #[arg(long)]
    project: Uuid,
  },

  /// Commits on a branch with the traces linked to them, newest first.
  Commits {
    #[arg(long)]
    project: Uuid,
    #[arg(long)]
    branch:  String,
    #[arg(long, default_value_t = 20)]
    limit:   u32,
  },

  /// Summary statistics.
  Stats {
    #[arg(long)]
    project: Uuid,
    #[command(subcommand)]
    kind:    StatsKind,
  },

  /// Purge rows created more than `--days` days ago in one project.
  Retention {
    #[arg(long)]
    project: Uuid,
    /// Defaults to `retention_days` from the configuration.
    #[arg(long)]
    days:    Option<u32>,
    #[arg(long)]
    dry_run: bool,
  },

  /// Purge child rows whose trace is gone, in one project or all.
  Orphans {
    #[arg(long)]
    project: Option<Uuid>,
    #[arg(long)]
    dry_run: bool,
  },

  /// Remove every row of one project.
  PurgeProject {
    #[arg(long)]
    project: Uuid,
    #[arg(long)]
    dry_run: bool,
  },

  /// Physically drop superseded row versions.
  Compact,
}

#[derive(Subcommand)]
enum StatsKind {
  /// Numeric scores with one name.
  Scores {
    #[arg(long)]
    name: String,
  },
  /// File operations, optionally within one trace.
  Files {
    #[arg(long)]
    trace: Option<String>,
  },
  /// Terminal commands, optionally within one trace.
  Commands {
    #[arg(long)]
    trace: Option<String>,
  },
  /// CI runs.
  Ci,
}

#[derive(clap::Args)]
struct PageArgs {
  #[arg(long)]
  limit:  Option<u32>,
  #[arg(long, default_value_t = 0)]
  offset: u32,
}

impl From<PageArgs> for PageRequest {
  fn from(args: PageArgs) -> Self {
    Self {
      limit:  args.limit,
      offset: args.offset,
    }
  }
}

// ─── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct Settings {
  #[serde(default = "default_store_path")]
  store_path:         PathBuf,
  #[serde(default = "default_query_timeout_secs")]
  query_timeout_secs: u64,
  #[serde(default = "default_batch_size")]
  batch_size:         usize,
  #[serde(default = "default_retention_days")]
  retention_days:     u32,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/tracery/tracery.db") }

fn default_query_timeout_secs() -> u64 { 30 }

fn default_batch_size() -> usize { 500 }

fn default_retention_days() -> u32 { 90 }

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings: Settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("TRACERY"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise Settings")?;

  let store_path = expand_tilde(&settings.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?
    .with_options(StoreOptions {
      query_timeout: StdDuration::from_secs(settings.query_timeout_secs),
    });

  run(cli.command, Arc::new(store), &settings).await
}

async fn run(
  command: Command,
  store: Arc<SqliteStore>,
  settings: &Settings,
) -> anyhow::Result<()> {
  match command {
    Command::Ingest { file } => {
      let ingest = Ingest::new(&store, settings.batch_size);
      let summary = match file.filter(|f| f.as_os_str() != "-") {
        Some(path) => {
          let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("failed to open {path:?}"))?;
          ingest.run(BufReader::new(file)).await?
        }
        None => ingest.run(BufReader::new(tokio::io::stdin())).await?,
      };
      emit(&summary)
    }

    Command::Traces {
      project,
      session,
      user,
      name,
      tags,
      level,
      search,
      order_by,
      desc,
      page,
    } => {
      let mut filter = TraceFilter {
        session_id: session,
        user_id: user,
        name,
        tags,
        level,
        search,
        ..TraceFilter::new(project)
      };
      if let Some(column) = order_by {
        filter = filter.order_by(&column, desc)?;
      }
      let repo: TraceRepository<_> = Repository::new(store);
      emit(&repo.list(&filter, page.into()).await?)
    }

    Command::Tree { project, trace } => {
      let repo: ObservationRepository<_> = Repository::new(store);
      let forest: ObservationForest = repo.get_tree(project, &trace).await?;
      emit(&forest.into_trees())
    }

    Command::Rollup { project, trace } => {
      let observations: ObservationRepository<_> =
        Repository::new(Arc::clone(&store));
      let traces: TraceRepository<_> = Repository::new(store);
      let rollup = observations.rollup_for_trace(project, &trace).await?;
      emit(&traces.apply_rollup(project, &trace, &rollup).await?)
    }

    Command::Sessions {
      project,
      user,
      page,
    } => {
      let filter = SessionFilter {
        user_id: user,
        ..SessionFilter::new(project)
      };
      let repo = SessionRepository::new(store);
      emit(&repo.list(&filter, page.into()).await?)
    }

    Command::Users { project } => {
      emit(&SessionRepository::new(store).distinct_user_ids(project).await?)
    }

    Command::Commits {
      project,
      branch,
      limit,
    } => {
      let repo: GitLinkRepository<_> = Repository::new(store);
      emit(&repo.timeline(project, &branch, limit).await?)
    }

    Command::Stats { project, kind } => match kind {
      StatsKind::Scores { name } => {
        let repo: ScoreRepository<_> = Repository::new(store);
        emit(&repo.stats(project, &name).await?)
      }
      StatsKind::Files { trace } => {
        let repo: FileOperationRepository<_> = Repository::new(store);
        emit(&repo.stats(project, trace.as_deref()).await?)
      }
      StatsKind::Commands { trace } => {
        let repo: TerminalCommandRepository<_> = Repository::new(store);
        emit(&repo.stats(project, trace.as_deref()).await?)
      }
      StatsKind::Ci => {
        let repo: CiRunRepository<_> = Repository::new(store);
        emit(&repo.stats(project).await?)
      }
    },

    Command::Retention {
      project,
      days,
      dry_run,
    } => {
      let days = days.unwrap_or(settings.retention_days);
      let cutoff = Utc::now() - Duration::days(i64::from(days));
      let report = Sweeper::new(store)
        .retention(project, cutoff, mode(dry_run))
        .await?;
      emit(&report)
    }

    Command::Orphans { project, dry_run } => {
      emit(&Sweeper::new(store).orphans(project, mode(dry_run)).await?)
    }

    Command::PurgeProject { project, dry_run } => {
      let report = Sweeper::new(store)
        .purge_project(project, mode(dry_run))
        .await?;
      emit(&report)
    }

    Command::Compact => {
      let removed = store.compact().await.context("compaction failed")?;
      emit(&serde_json::json!({ "removed": removed }))
    }
  }
}

fn mode(dry_run: bool) -> Mode {
  if dry_run { Mode::DryRun } else { Mode::Execute }
}

/// Print `value` to stdout as pretty JSON.
fn emit(value: &impl Serialize) -> anyhow::Result<()> {
  let json =
    serde_json::to_string_pretty(value).context("failed to encode output")?;
  println!("{json}");
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_nested_stats_command() {
    let project = Uuid::new_v4();
    let cli = Cli::try_parse_from([
      "tracery",
      "stats",
      "--project",
      &project.to_string(),
      "files",
      "--trace",
      "t-1",
    ])
    .unwrap();
    match cli.command {
      Command::Stats {
        project: p,
        kind: StatsKind::Files { trace },
      } => {
        assert_eq!(p, project);
        assert_eq!(trace.as_deref(), Some("t-1"));
      }
      _ => panic!("wrong command"),
    }
  }

  #[test]
  fn traces_accepts_repeated_tags() {
    let cli = Cli::try_parse_from([
      "tracery",
      "traces",
      "--project",
      &Uuid::new_v4().to_string(),
      "--tag",
      "ci",
      "--tag",
      "nightly",
      "--level",
      "ERROR",
    ])
    .unwrap();
    let Command::Traces { tags, level, .. } = cli.command else {
      panic!("wrong command");
    };
    assert_eq!(tags, vec!["ci", "nightly"]);
    assert_eq!(level, Some(Level::Error));
  }

  #[test]
  fn settings_fall_back_to_defaults() {
    let settings: Settings = config::Config::builder()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(settings.batch_size, 500);
    assert_eq!(settings.retention_days, 90);
    assert_eq!(settings.query_timeout_secs, 30);
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else {
      return;
    };
    let expanded = expand_tilde(Path::new("~/data/tracery.db"));
    assert_eq!(expanded, PathBuf::from(home).join("data/tracery.db"));
    assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
  }
}
