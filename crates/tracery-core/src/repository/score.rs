use uuid::Uuid;

use super::Repository;
use crate::{
  Result,
  model::score::{SCORES, Score, ScoreDataType, ScoreStats, ScoreValue},
  predicate::{Aggregate, GroupQuery, OrderBy, Predicate, Select},
  row::ID,
  store::RowStore,
  sweeper::{self, Mode, TableSweep},
};

impl<S: RowStore> Repository<S, Score> {
  /// Scores on a trace, newest first.
  pub async fn get_by_trace_id(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<Vec<Score>> {
    self
      .by_trace(project_id, trace_id, &[OrderBy::desc("created_at")])
      .await
  }

  pub async fn get_by_observation_id(
    &self,
    project_id: Uuid,
    observation_id: &str,
  ) -> Result<Vec<Score>> {
    let predicate =
      Predicate::for_project(project_id)?.eq("observation_id", observation_id);
    self
      .fetch(Select::new(predicate).order([OrderBy::desc("created_at")]))
      .await
  }

  pub async fn delete(&self, project_id: Uuid, score_id: Uuid) -> Result<TableSweep> {
    let predicate = Predicate::for_project(project_id)?.eq(ID, score_id);
    sweeper::sweep_table(&*self.store, &SCORES, predicate, Mode::Execute).await
  }

  /// Count, mean, extremes and median of the numeric scores named `name`.
  pub async fn stats(&self, project_id: Uuid, name: &str) -> Result<ScoreStats> {
    let predicate = Predicate::for_project(project_id)?
      .eq("name", name)
      .eq("data_type", ScoreDataType::Numeric.as_ref())
      .not_null("value");

    let query = GroupQuery::new(predicate.clone())
      .aggregate("count", Aggregate::Count)
      .aggregate("avg", Aggregate::Avg("value"))
      .aggregate("min", Aggregate::Min("value"))
      .aggregate("max", Aggregate::Max("value"))
      .limit(1);
    let mut row = self
      .store
      .aggregate(&SCORES, query)
      .await?
      .into_iter()
      .next()
      .unwrap_or_default();

    let count = row.uint("count")?;
    Ok(ScoreStats {
      name: name.to_owned(),
      count,
      avg: row.opt_float("avg")?,
      min: row.opt_float("min")?,
      max: row.opt_float("max")?,
      median: self.median(predicate, count).await?,
    })
  }

  /// Median of `value` over `count` matching rows, read by offset from the
  /// sorted middle.
  async fn median(&self, predicate: Predicate, count: u64) -> Result<Option<f64>> {
    if count == 0 {
      return Ok(None);
    }
    let take = if count % 2 == 0 { 2 } else { 1 };
    let middle = self
      .fetch(
        Select::new(predicate)
          .order([OrderBy::asc("value")])
          .offset((count - 1) / 2)
          .limit(take),
      )
      .await?;
    let values: Vec<f64> = middle
      .iter()
      .filter_map(|s| match s.value {
        ScoreValue::Numeric(v) => Some(v),
        _ => None,
      })
      .collect();
    if values.is_empty() {
      return Ok(None);
    }
    Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
  }

  /// Distinct score names in a project, sorted.
  pub async fn distinct_names(&self, project_id: Uuid) -> Result<Vec<String>> {
    let query = GroupQuery::new(Predicate::for_project(project_id)?)
      .group_by("name")
      .order([OrderBy::asc("name")]);
    self
      .store
      .aggregate(&SCORES, query)
      .await?
      .into_iter()
      .map(|mut row| row.text("name"))
      .collect()
  }
}
