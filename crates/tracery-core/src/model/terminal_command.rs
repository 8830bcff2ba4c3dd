//! Shell commands run by an agent's tools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
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

pub static TERMINAL_COMMANDS: Table = Table {
  name:          "terminal_commands",
  entity:        "terminal command",
  columns:       &[
    col(ID, K::Uuid),
    col(PROJECT_ID, K::Uuid),
    col(TRACE_ID, K::Text),
    col("observation_id", K::Text),
    col("command", K::Text),
    col("args", K::List),
    col("working_directory", K::Text),
    col("shell", K::Text),
    col("env_vars", K::Text),
    col("started_at", K::Timestamp),
    col("completed_at", K::Timestamp),
    col("duration_ms", K::Int),
    col("exit_code", K::Int),
    col("stdout", K::Text),
    col("stderr", K::Text),
    col("stdout_truncated", K::Bool),
    col("stderr_truncated", K::Bool),
    col("success", K::Bool),
    col("timed_out", K::Bool),
    col("killed", K::Bool),
    col("max_memory_bytes", K::Int),
    col("cpu_time_ms", K::Int),
    col("tool_name", K::Text),
    col("reason", K::Text),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  Some(TRACE_ID),
  default_order: &[OrderBy::desc("started_at")],
  sortable:      &["started_at", "duration_ms", "exit_code", CREATED_AT],
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalCommand {
  pub id:                Uuid,
  pub project_id:        Uuid,
  pub trace_id:          String,
  pub observation_id:    Option<String>,
  pub command:           String,
  #[serde(default)]
  pub args:              Vec<String>,
  pub working_directory: Option<String>,
  pub shell:             Option<String>,
  /// Serialized environment overrides, secrets already redacted.
  pub env_vars:          Option<String>,
  pub started_at:        DateTime<Utc>,
  pub completed_at:      Option<DateTime<Utc>>,
  #[serde(default)]
  pub duration_ms:       u32,
  #[serde(default)]
  pub exit_code:         i32,
  #[serde(default)]
  pub stdout:            String,
  #[serde(default)]
  pub stderr:            String,
  #[serde(default)]
  pub stdout_truncated:  bool,
  #[serde(default)]
  pub stderr_truncated:  bool,
  #[serde(default)]
  pub success:           bool,
  #[serde(default)]
  pub timed_out:         bool,
  #[serde(default)]
  pub killed:            bool,
  #[serde(default)]
  pub max_memory_bytes:  u64,
  #[serde(default)]
  pub cpu_time_ms:       u32,
  pub tool_name:         Option<String>,
  pub reason:            Option<String>,
  #[serde(default = "Utc::now")]
  pub created_at:        DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:        DateTime<Utc>,
}

impl TerminalCommand {
  pub fn new(
    project_id: Uuid,
    trace_id: impl Into<String>,
    command: impl Into<String>,
    started_at: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      project_id,
      trace_id: trace_id.into(),
      observation_id: None,
      command: command.into(),
      args: Vec::new(),
      working_directory: None,
      shell: None,
      env_vars: None,
      started_at,
      completed_at: None,
      duration_ms: 0,
      exit_code: 0,
      stdout: String::new(),
      stderr: String::new(),
      stdout_truncated: false,
      stderr_truncated: false,
      success: true,
      timed_out: false,
      killed: false,
      max_memory_bytes: 0,
      cpu_time_ms: 0,
      tool_name: None,
      reason: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// The command line as typed.
  pub fn command_line(&self) -> String {
    std::iter::once(self.command.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

impl Record for TerminalCommand {
  type Id = Uuid;

  const TABLE: &'static Table = &TERMINAL_COMMANDS;

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
      .set("command", &self.command)
      .set("args", self.args.as_slice())
      .set("working_directory", self.working_directory.as_deref())
      .set("shell", self.shell.as_deref())
      .set("env_vars", self.env_vars.as_deref())
      .set("started_at", self.started_at)
      .set("completed_at", self.completed_at)
      .set("duration_ms", self.duration_ms)
      .set("exit_code", self.exit_code)
      .set("stdout", &self.stdout)
      .set("stderr", &self.stderr)
      .set("stdout_truncated", self.stdout_truncated)
      .set("stderr_truncated", self.stderr_truncated)
      .set("success", self.success)
      .set("timed_out", self.timed_out)
      .set("killed", self.killed)
      .set("max_memory_bytes", self.max_memory_bytes)
      .set("cpu_time_ms", self.cpu_time_ms)
      .set("tool_name", self.tool_name.as_deref())
      .set("reason", self.reason.as_deref())
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    let exit_code = row.int("exit_code")?;
    Ok(Self {
      id: row.uuid(ID)?,
      project_id: row.uuid(PROJECT_ID)?,
      trace_id: row.text(TRACE_ID)?,
      observation_id: row.opt_text("observation_id")?,
      command: row.text("command")?,
      args: row.list("args")?,
      working_directory: row.opt_text("working_directory")?,
      shell: row.opt_text("shell")?,
      env_vars: row.opt_text("env_vars")?,
      started_at: row.timestamp("started_at")?,
      completed_at: row.opt_timestamp("completed_at")?,
      duration_ms: row.uint("duration_ms")?,
      exit_code: i32::try_from(exit_code).map_err(|_| {
        crate::Error::decode("exit_code", format!("{exit_code} out of range"))
      })?,
      stdout: row.text("stdout")?,
      stderr: row.text("stderr")?,
      stdout_truncated: row.bool("stdout_truncated")?,
      stderr_truncated: row.bool("stderr_truncated")?,
      success: row.bool("success")?,
      timed_out: row.bool("timed_out")?,
      killed: row.bool("killed")?,
      max_memory_bytes: row.uint("max_memory_bytes")?,
      cpu_time_ms: row.uint("cpu_time_ms")?,
      tool_name: row.opt_text("tool_name")?,
      reason: row.opt_text("reason")?,
      created_at: row.timestamp(CREATED_AT)?,
      updated_at: row.timestamp(UPDATED_AT)?,
    })
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalCommandFilter {
  pub project_id:     Uuid,
  pub trace_id:       Option<String>,
  pub observation_id: Option<String>,
  /// Substring of the command.
  pub command:        Option<String>,
  pub exit_code:      Option<i32>,
  pub success:        Option<bool>,
  pub timed_out:      Option<bool>,
  pub tool_name:      Option<String>,
  pub from_time:      Option<DateTime<Utc>>,
  pub to_time:        Option<DateTime<Utc>>,
}

impl TerminalCommandFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }
}

impl Filter for TerminalCommandFilter {
  type Record = TerminalCommand;

  fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .eq_opt(TRACE_ID, self.trace_id.as_deref())
        .eq_opt("observation_id", self.observation_id.as_deref())
        .contains("command", self.command.as_deref())
        .eq_opt("exit_code", self.exit_code)
        .eq_opt("success", self.success)
        .eq_opt("timed_out", self.timed_out)
        .eq_opt("tool_name", self.tool_name.as_deref())
        .between("started_at", self.from_time, self.to_time),
    )
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TerminalCommandStats {
  pub total:             u64,
  pub succeeded:         u64,
  pub failed:            u64,
  pub timed_out:         u64,
  pub avg_duration_ms:   f64,
  pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_round_trip_preserves_fields() {
    let mut cmd =
      TerminalCommand::new(Uuid::new_v4(), "t-1", "cargo", Utc::now());
    cmd.args = vec!["test".into(), "--all".into()];
    cmd.exit_code = -9;
    cmd.killed = true;
    cmd.success = false;
    assert_eq!(TerminalCommand::from_row(cmd.to_row()).unwrap(), cmd);
  }

  #[test]
  fn command_line_joins_args() {
    let mut cmd = TerminalCommand::new(Uuid::new_v4(), "t-1", "git", Utc::now());
    cmd.args = vec!["status".into(), "-s".into()];
    assert_eq!(cmd.command_line(), "git status -s");
  }
}
