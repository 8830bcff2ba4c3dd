//! Observations: spans, generations and events inside a trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::{Level, check_span, elapsed_ms};
use crate::{
  Result,
  predicate::{OrderBy, Predicate},
  record::{Filter, Record},
  row::{
    CREATED_AT, ColumnKind as K, ID, PROJECT_ID, Row, TRACE_ID, Table,
    UPDATED_AT, col,
  },
};

pub static OBSERVATIONS: Table = Table {
  name:          "observations",
  entity:        "observation",
  columns:       &[
    col(ID, K::Text),
    col(TRACE_ID, K::Text),
    col(PROJECT_ID, K::Uuid),
    col("parent_observation_id", K::Text),
    col("type", K::Text),
    col("name", K::Text),
    col("level", K::Text),
    col("status_message", K::Text),
    col("metadata", K::Text),
    col("start_time", K::Timestamp),
    col("end_time", K::Timestamp),
    col("completion_start_time", K::Timestamp),
    col("duration_ms", K::Float),
    col("time_to_first_token_ms", K::Float),
    col("input", K::Text),
    col("output", K::Text),
    col("model", K::Text),
    col("model_parameters", K::Text),
    col("input_tokens", K::Int),
    col("output_tokens", K::Int),
    col("total_tokens", K::Int),
    col("cache_read_tokens", K::Int),
    col("cache_creation_tokens", K::Int),
    col("input_cost", K::Float),
    col("output_cost", K::Float),
    col("total_cost", K::Float),
    col("currency", K::Text),
    col("prompt_id", K::Uuid),
    col("prompt_version", K::Int),
    col("prompt_name", K::Text),
    col("version", K::Text),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  Some(TRACE_ID),
  default_order: &[OrderBy::desc("start_time")],
  sortable:      &["start_time", "duration_ms", "total_cost", "name", CREATED_AT],
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationType {
  #[default]
  Span,
  Generation,
  Event,
}

/// Token counts for a generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
  pub input_tokens:          u64,
  pub output_tokens:         u64,
  pub total_tokens:          u64,
  pub cache_read_tokens:     u64,
  pub cache_creation_tokens: u64,
}

impl Usage {
  /// Usage with the total derived from input and output.
  pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
    Self {
      input_tokens,
      output_tokens,
      total_tokens: input_tokens + output_tokens,
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.input_tokens == 0 && self.output_tokens == 0 && self.total_tokens == 0
  }
}

/// Monetary cost of a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cost {
  pub input_cost:  f64,
  pub output_cost: f64,
  pub total_cost:  f64,
  pub currency:    String,
}

impl Default for Cost {
  fn default() -> Self {
    Self {
      input_cost:  0.0,
      output_cost: 0.0,
      total_cost:  0.0,
      currency:    "USD".to_owned(),
    }
  }
}

impl Cost {
  pub fn new(input_cost: f64, output_cost: f64) -> Self {
    Self {
      input_cost,
      output_cost,
      total_cost: input_cost + output_cost,
      ..Self::default()
    }
  }
}

/// A unit of work inside a trace. Observations form a forest through
/// `parent_observation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub id:                    String,
  pub trace_id:              String,
  pub project_id:            Uuid,
  pub parent_observation_id: Option<String>,
  #[serde(rename = "type", default)]
  pub kind:                  ObservationType,
  #[serde(default)]
  pub name:                  String,
  #[serde(default)]
  pub level:                 Level,
  #[serde(default)]
  pub status_message:        String,
  #[serde(default)]
  pub metadata:              serde_json::Value,
  pub start_time:            DateTime<Utc>,
  pub end_time:              Option<DateTime<Utc>>,
  pub completion_start_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub input:                 serde_json::Value,
  #[serde(default)]
  pub output:                serde_json::Value,
  pub model:                 Option<String>,
  #[serde(default)]
  pub model_parameters:      serde_json::Value,
  #[serde(default)]
  pub usage:                 Usage,
  #[serde(default)]
  pub cost:                  Cost,
  pub prompt_id:             Option<Uuid>,
  pub prompt_version:        Option<u32>,
  pub prompt_name:           Option<String>,
  #[serde(default)]
  pub version:               String,
  #[serde(default = "Utc::now")]
  pub created_at:            DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:            DateTime<Utc>,
}

impl Observation {
  pub fn new(
    project_id: Uuid,
    trace_id: impl Into<String>,
    id: impl Into<String>,
    kind: ObservationType,
    start_time: DateTime<Utc>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      trace_id: trace_id.into(),
      project_id,
      parent_observation_id: None,
      kind,
      name: String::new(),
      level: Level::Default,
      status_message: String::new(),
      metadata: serde_json::Value::Null,
      start_time,
      end_time: None,
      completion_start_time: None,
      input: serde_json::Value::Null,
      output: serde_json::Value::Null,
      model: None,
      model_parameters: serde_json::Value::Null,
      usage: Usage::default(),
      cost: Cost::default(),
      prompt_id: None,
      prompt_version: None,
      prompt_name: None,
      version: String::new(),
      created_at: now,
      updated_at: now,
    }
  }

  pub fn is_generation(&self) -> bool { self.kind == ObservationType::Generation }

  pub fn duration_ms(&self) -> f64 { elapsed_ms(self.start_time, self.end_time) }

  /// Latency until the first streamed token, for generations.
  pub fn time_to_first_token_ms(&self) -> f64 {
    elapsed_ms(self.start_time, self.completion_start_time)
  }

  /// A generation with a model and token usage but no recorded cost.
  pub fn needs_costing(&self) -> bool {
    self.is_generation()
      && self.model.as_deref().is_some_and(|m| !m.is_empty())
      && !self.usage.is_empty()
      && self.cost.total_cost == 0.0
  }
}

impl Record for Observation {
  type Id = String;

  const TABLE: &'static Table = &OBSERVATIONS;

  fn id(&self) -> String { self.id.clone() }

  fn project_id(&self) -> Uuid { self.project_id }

  fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn validate(&self) -> Result<()> {
    check_span("observation", &self.id, self.start_time, self.end_time)
  }

  fn to_row(&self) -> Row {
    let mut row = Row::new();
    row
      .set(ID, &self.id)
      .set(TRACE_ID, &self.trace_id)
      .set(PROJECT_ID, self.project_id)
      .set("parent_observation_id", self.parent_observation_id.as_deref())
      .set("type", self.kind.as_ref())
      .set("name", &self.name)
      .set("level", self.level.as_ref())
      .set("status_message", &self.status_message)
      .set("metadata", &self.metadata)
      .set("start_time", self.start_time)
      .set("end_time", self.end_time)
      .set("completion_start_time", self.completion_start_time)
      .set("duration_ms", self.duration_ms())
      .set("time_to_first_token_ms", self.time_to_first_token_ms())
      .set("input", &self.input)
      .set("output", &self.output)
      .set("model", self.model.as_deref())
      .set("model_parameters", &self.model_parameters)
      .set("input_tokens", self.usage.input_tokens)
      .set("output_tokens", self.usage.output_tokens)
      .set("total_tokens", self.usage.total_tokens)
      .set("cache_read_tokens", self.usage.cache_read_tokens)
      .set("cache_creation_tokens", self.usage.cache_creation_tokens)
      .set("input_cost", self.cost.input_cost)
      .set("output_cost", self.cost.output_cost)
      .set("total_cost", self.cost.total_cost)
      .set("currency", &self.cost.currency)
      .set("prompt_id", self.prompt_id)
      .set("prompt_version", self.prompt_version)
      .set("prompt_name", self.prompt_name.as_deref())
      .set("version", &self.version)
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    Ok(Self {
      id:                    row.text(ID)?,
      trace_id:              row.text(TRACE_ID)?,
      project_id:            row.uuid(PROJECT_ID)?,
      parent_observation_id: row.opt_text("parent_observation_id")?,
      kind:                  row.parse("type")?,
      name:                  row.text("name")?,
      level:                 row.parse("level")?,
      status_message:        row.text("status_message")?,
      metadata:              row.json("metadata")?,
      start_time:            row.timestamp("start_time")?,
      end_time:              row.opt_timestamp("end_time")?,
      completion_start_time: row.opt_timestamp("completion_start_time")?,
      input:                 row.json("input")?,
      output:                row.json("output")?,
      model:                 row.opt_text("model")?,
      model_parameters:      row.json("model_parameters")?,
      usage:                 Usage {
        input_tokens:          row.uint("input_tokens")?,
        output_tokens:         row.uint("output_tokens")?,
        total_tokens:          row.uint("total_tokens")?,
        cache_read_tokens:     row.uint("cache_read_tokens")?,
        cache_creation_tokens: row.uint("cache_creation_tokens")?,
      },
      cost:                  Cost {
        input_cost:  row.float("input_cost")?,
        output_cost: row.float("output_cost")?,
        total_cost:  row.float("total_cost")?,
        currency:    row.text("currency")?,
      },
      prompt_id:             row.opt_uuid("prompt_id")?,
      prompt_version:        row.opt_uint("prompt_version")?,
      prompt_name:           row.opt_text("prompt_name")?,
      version:               row.text("version")?,
      created_at:            row.timestamp(CREATED_AT)?,
      updated_at:            row.timestamp(UPDATED_AT)?,
    })
  }
}

// ─── Filter ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationFilter {
  pub project_id:            Uuid,
  pub trace_id:              Option<String>,
  pub parent_observation_id: Option<String>,
  #[serde(rename = "type")]
  pub kind:                  Option<ObservationType>,
  /// Substring of the observation name.
  pub name:                  Option<String>,
  pub model:                 Option<String>,
  pub level:                 Option<Level>,
  pub from_time:             Option<DateTime<Utc>>,
  pub to_time:               Option<DateTime<Utc>>,
}

impl ObservationFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }
}

impl Filter for ObservationFilter {
  type Record = Observation;

  fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .eq_opt(TRACE_ID, self.trace_id.as_deref())
        .eq_opt("parent_observation_id", self.parent_observation_id.as_deref())
        .eq_opt("type", self.kind.map(|k| k.as_ref().to_owned()))
        .contains("name", self.name.as_deref())
        .eq_opt("model", self.model.as_deref())
        .eq_opt("level", self.level.map(|l| l.as_ref().to_owned()))
        .between("start_time", self.from_time, self.to_time),
    )
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  fn generation() -> Observation {
    let mut obs = Observation::new(
      Uuid::new_v4(),
      "t-1",
      "o-1",
      ObservationType::Generation,
      Utc::now(),
    );
    obs.model = Some("claude".into());
    obs.usage = Usage::new(100, 20);
    obs
  }

  #[test]
  fn row_round_trip_preserves_fields() {
    let mut obs = generation();
    obs.parent_observation_id = Some("o-0".into());
    obs.completion_start_time = Some(obs.start_time + Duration::milliseconds(80));
    obs.prompt_id = Some(Uuid::new_v4());
    obs.prompt_version = Some(3);
    obs.model_parameters = serde_json::json!({ "temperature": 0.2 });

    let back = Observation::from_row(obs.to_row()).unwrap();
    assert_eq!(back, obs);
  }

  #[test]
  fn type_is_stored_in_screaming_case() {
    let row = generation().to_row();
    assert_eq!(
      row.get("type"),
      Some(&crate::row::Value::Text("GENERATION".into()))
    );
  }

  #[test]
  fn needs_costing_requires_model_usage_and_zero_cost() {
    let mut obs = generation();
    assert!(obs.needs_costing());

    obs.cost = Cost::new(0.01, 0.02);
    assert!(!obs.needs_costing());

    let mut span = generation();
    span.kind = ObservationType::Span;
    assert!(!span.needs_costing());

    let mut no_model = generation();
    no_model.model = Some(String::new());
    assert!(!no_model.needs_costing());
  }
}
