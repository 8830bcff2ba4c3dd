//! Scores: evaluations attached to a trace or one of its observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  predicate::{OrderBy, Predicate},
  record::{Filter, Record},
  row::{
    CREATED_AT, ColumnKind as K, ID, PROJECT_ID, Row, TRACE_ID, Table,
    UPDATED_AT, col,
  },
};

pub static SCORES: Table = Table {
  name:          "scores",
  entity:        "score",
  columns:       &[
    col(ID, K::Uuid),
    col(PROJECT_ID, K::Uuid),
    col(TRACE_ID, K::Text),
    col("observation_id", K::Text),
    col("name", K::Text),
    col("source", K::Text),
    col("data_type", K::Text),
    col("value", K::Float),
    col("string_value", K::Text),
    col("comment", K::Text),
    col("config_id", K::Uuid),
    col("author_user_id", K::Uuid),
    col(CREATED_AT, K::Timestamp),
    col(UPDATED_AT, K::Timestamp),
  ],
  trace_column:  Some(TRACE_ID),
  default_order: &[OrderBy::desc(CREATED_AT)],
  sortable:      &["name", "value", CREATED_AT],
};

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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreSource {
  #[default]
  Api,
  Eval,
  Annotation,
}

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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreDataType {
  Numeric,
  Boolean,
  Categorical,
}

/// The value of a score, tagged by its data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreValue {
  Numeric(f64),
  Boolean(bool),
  Categorical(String),
}

impl ScoreValue {
  pub fn data_type(&self) -> ScoreDataType {
    match self {
      Self::Numeric(_) => ScoreDataType::Numeric,
      Self::Boolean(_) => ScoreDataType::Boolean,
      Self::Categorical(_) => ScoreDataType::Categorical,
    }
  }

  /// `(value, string_value)` column pair.
  fn columns(&self) -> (Option<f64>, Option<&str>) {
    match self {
      Self::Numeric(v) => (Some(*v), None),
      Self::Boolean(b) => (Some(if *b { 1.0 } else { 0.0 }), None),
      Self::Categorical(s) => (None, Some(s)),
    }
  }

  fn from_columns(
    data_type: ScoreDataType,
    value: Option<f64>,
    string_value: Option<String>,
  ) -> Result<Self> {
    match (data_type, value, string_value) {
      (ScoreDataType::Numeric, Some(v), _) => Ok(Self::Numeric(v)),
      (ScoreDataType::Boolean, Some(v), _) if v == 0.0 || v == 1.0 => {
        Ok(Self::Boolean(v == 1.0))
      }
      (ScoreDataType::Categorical, _, Some(s)) => Ok(Self::Categorical(s)),
      (data_type, value, string_value) => Err(Error::decode(
        "value",
        format!("{data_type} score with value {value:?} and {string_value:?}"),
      )),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
  pub id:             Uuid,
  pub project_id:     Uuid,
  pub trace_id:       String,
  pub observation_id: Option<String>,
  pub name:           String,
  #[serde(default)]
  pub source:         ScoreSource,
  #[serde(flatten)]
  pub value:          ScoreValue,
  #[serde(default)]
  pub comment:        String,
  pub config_id:      Option<Uuid>,
  pub author_user_id: Option<Uuid>,
  #[serde(default = "Utc::now")]
  pub created_at:     DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at:     DateTime<Utc>,
}

impl Score {
  pub fn new(
    project_id: Uuid,
    trace_id: impl Into<String>,
    name: impl Into<String>,
    value: ScoreValue,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      project_id,
      trace_id: trace_id.into(),
      observation_id: None,
      name: name.into(),
      source: ScoreSource::Api,
      value,
      comment: String::new(),
      config_id: None,
      author_user_id: None,
      created_at: now,
      updated_at: now,
    }
  }
}

impl Record for Score {
  type Id = Uuid;

  const TABLE: &'static Table = &SCORES;

  fn id(&self) -> Uuid { self.id }

  fn project_id(&self) -> Uuid { self.project_id }

  fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn validate(&self) -> Result<()> {
    match self.value {
      ScoreValue::Numeric(v) if !v.is_finite() => Err(Error::InvalidArgument(
        format!("score {} has non-finite value {v}", self.id),
      )),
      _ => Ok(()),
    }
  }

  fn to_row(&self) -> Row {
    let (value, string_value) = self.value.columns();
    let mut row = Row::new();
    row
      .set(ID, self.id)
      .set(PROJECT_ID, self.project_id)
      .set(TRACE_ID, &self.trace_id)
      .set("observation_id", self.observation_id.as_deref())
      .set("name", &self.name)
      .set("source", self.source.as_ref())
      .set("data_type", self.value.data_type().as_ref())
      .set("value", value)
      .set("string_value", string_value)
      .set("comment", &self.comment)
      .set("config_id", self.config_id)
      .set("author_user_id", self.author_user_id)
      .set(CREATED_AT, self.created_at)
      .set(UPDATED_AT, self.updated_at);
    row
  }

  fn from_row(mut row: Row) -> Result<Self> {
    let data_type = row.parse("data_type")?;
    let value = ScoreValue::from_columns(
      data_type,
      row.opt_float("value")?,
      row.opt_text("string_value")?,
    )?;
    Ok(Self {
      id: row.uuid(ID)?,
      project_id: row.uuid(PROJECT_ID)?,
      trace_id: row.text(TRACE_ID)?,
      observation_id: row.opt_text("observation_id")?,
      name: row.text("name")?,
      source: row.parse("source")?,
      value,
      comment: row.text("comment")?,
      config_id: row.opt_uuid("config_id")?,
      author_user_id: row.opt_uuid("author_user_id")?,
      created_at: row.timestamp(CREATED_AT)?,
      updated_at: row.timestamp(UPDATED_AT)?,
    })
  }
}

// ─── Filter ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreFilter {
  pub project_id:     Uuid,
  pub trace_id:       Option<String>,
  pub observation_id: Option<String>,
  pub name:           Option<String>,
  pub source:         Option<ScoreSource>,
  pub data_type:      Option<ScoreDataType>,
  pub config_id:      Option<Uuid>,
  pub from_time:      Option<DateTime<Utc>>,
  pub to_time:        Option<DateTime<Utc>>,
}

impl ScoreFilter {
  pub fn new(project_id: Uuid) -> Self {
    Self {
      project_id,
      ..Self::default()
    }
  }
}

impl Filter for ScoreFilter {
  type Record = Score;

  fn predicate(&self) -> Result<Predicate> {
    Ok(
      Predicate::for_project(self.project_id)?
        .eq_opt(TRACE_ID, self.trace_id.as_deref())
        .eq_opt("observation_id", self.observation_id.as_deref())
        .eq_opt("name", self.name.as_deref())
        .eq_opt("source", self.source.map(|s| s.as_ref().to_owned()))
        .eq_opt("data_type", self.data_type.map(|d| d.as_ref().to_owned()))
        .eq_opt("config_id", self.config_id)
        .between(CREATED_AT, self.from_time, self.to_time),
    )
  }
}

/// Summary statistics over the numeric scores with one name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreStats {
  pub name:   String,
  pub count:  u64,
  pub avg:    Option<f64>,
  pub min:    Option<f64>,
  pub max:    Option<f64>,
  pub median: Option<f64>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn each_value_kind_round_trips() {
    for value in [
      ScoreValue::Numeric(0.75),
      ScoreValue::Boolean(true),
      ScoreValue::Boolean(false),
      ScoreValue::Categorical("good".into()),
    ] {
      let score = Score::new(Uuid::new_v4(), "t-1", "quality", value);
      assert_eq!(Score::from_row(score.to_row()).unwrap(), score);
    }
  }

  #[test]
  fn boolean_rejects_non_binary_value() {
    let score =
      Score::new(Uuid::new_v4(), "t-1", "ok", ScoreValue::Numeric(0.5));
    let mut row = score.to_row();
    row.set("data_type", "BOOLEAN");
    assert!(matches!(Score::from_row(row), Err(Error::Decode { .. })));
  }

  #[test]
  fn categorical_stores_string_value_only() {
    let score = Score::new(
      Uuid::new_v4(),
      "t-1",
      "label",
      ScoreValue::Categorical("pass".into()),
    );
    let row = score.to_row();
    assert_eq!(row.get("value"), Some(&crate::row::Value::Null));
    assert_eq!(
      row.get("data_type"),
      Some(&crate::row::Value::Text("CATEGORICAL".into()))
    );
  }
}
