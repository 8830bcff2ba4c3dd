use uuid::Uuid;

use super::Repository;
use crate::{
  Result,
  hierarchy::ObservationForest,
  model::{
    observation::{OBSERVATIONS, Observation, ObservationType},
    trace::TraceRollup,
  },
  predicate::{Aggregate, GroupQuery, OrderBy, Predicate, RangeOp, Select},
  row::TRACE_ID,
  store::RowStore,
};

impl<S: RowStore> Repository<S, Observation> {
  /// Every observation of a trace, by start time.
  pub async fn get_by_trace_id(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<Vec<Observation>> {
    self
      .by_trace(project_id, trace_id, &[
        OrderBy::asc("start_time"),
        OrderBy::asc("id"),
      ])
      .await
  }

  /// The observation forest of one trace.
  pub async fn get_tree(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<ObservationForest> {
    let observations = self.get_by_trace_id(project_id, trace_id).await?;
    Ok(ObservationForest::assemble(observations))
  }

  pub async fn update_costs(
    &self,
    project_id: Uuid,
    observation_id: &str,
    input_cost: f64,
    output_cost: f64,
    total_cost: f64,
  ) -> Result<Observation> {
    let mut obs = self
      .get_by_id(project_id, &observation_id.to_owned())
      .await?;
    obs.cost.input_cost = input_cost;
    obs.cost.output_cost = output_cost;
    obs.cost.total_cost = total_cost;
    self.update(&mut obs).await?;
    Ok(obs)
  }

  /// Generations with a model and token usage but no cost yet, oldest first.
  pub async fn generations_without_cost(
    &self,
    project_id: Uuid,
    limit: u32,
  ) -> Result<Vec<Observation>> {
    let predicate = Predicate::for_project(project_id)?
      .eq("type", ObservationType::Generation.as_ref())
      .not_null("model")
      .ne("model", "")
      .range("total_tokens", RangeOp::Gt, 0i64)
      .eq("total_cost", 0.0);
    self
      .fetch(
        Select::new(predicate)
          .order([OrderBy::asc("start_time")])
          .limit(u64::from(limit)),
      )
      .await
  }

  /// Sum cost and usage over every observation of a trace.
  pub async fn rollup_for_trace(
    &self,
    project_id: Uuid,
    trace_id: &str,
  ) -> Result<TraceRollup> {
    let predicate = Predicate::for_project(project_id)?.eq(TRACE_ID, trace_id);
    let mut query =
      GroupQuery::new(predicate).aggregate("observations", Aggregate::Count);
    for column in ROLLUP_COLUMNS {
      query = query.aggregate(column, Aggregate::Sum(column));
    }
    let mut row = self
      .store
      .aggregate(&OBSERVATIONS, query)
      .await?
      .into_iter()
      .next()
      .unwrap_or_default();
    Ok(TraceRollup {
      observations:  row.uint("observations")?,
      input_cost:    row.float("input_cost")?,
      output_cost:   row.float("output_cost")?,
      total_cost:    row.float("total_cost")?,
      input_tokens:  row.uint("input_tokens")?,
      output_tokens: row.uint("output_tokens")?,
      total_tokens:  row.uint("total_tokens")?,
    })
  }
}

const ROLLUP_COLUMNS: [&str; 6] = [
  "input_cost",
  "output_cost",
  "total_cost",
  "input_tokens",
  "output_tokens",
  "total_tokens",
];

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{Duration, Utc};

  use super::*;
  use crate::{
    model::observation::{Cost, Usage},
    repository::ObservationRepository,
    testing::MemoryStore,
  };

  fn repo() -> ObservationRepository<MemoryStore> {
    Repository::new(Arc::new(MemoryStore::default()))
  }

  #[tokio::test]
  async fn tree_is_built_from_trace_observations() {
    let repo = repo();
    let project = Uuid::new_v4();
    let start = Utc::now();
    let root = Observation::new(project, "t-1", "root", ObservationType::Span, start);
    let mut child = Observation::new(
      project,
      "t-1",
      "child",
      ObservationType::Generation,
      start + Duration::milliseconds(5),
    );
    child.parent_observation_id = Some("root".into());
    let other = Observation::new(project, "t-2", "x", ObservationType::Event, start);
    repo.create_batch(&[child, root, other]).await.unwrap();

    let forest = repo.get_tree(project, "t-1").await.unwrap();
    assert_eq!(forest.len(), 2);
    let root = forest.roots().next().unwrap();
    assert_eq!(root.observation.id, "root");
    assert_eq!(forest.children(root).next().unwrap().observation.id, "child");
  }

  #[tokio::test]
  async fn finds_uncosted_generations() {
    let repo = repo();
    let project = Uuid::new_v4();
    let now = Utc::now();

    let mut pending =
      Observation::new(project, "t-1", "g-1", ObservationType::Generation, now);
    pending.model = Some("claude".into());
    pending.usage = Usage::new(10, 5);

    let mut costed = pending.clone();
    costed.id = "g-2".into();
    costed.cost = Cost::new(0.1, 0.2);

    let mut no_usage = pending.clone();
    no_usage.id = "g-3".into();
    no_usage.usage = Usage::default();

    let span = Observation::new(project, "t-1", "s-1", ObservationType::Span, now);
    repo
      .create_batch(&[pending, costed, no_usage, span])
      .await
      .unwrap();

    let found = repo.generations_without_cost(project, 10).await.unwrap();
    let ids: Vec<&str> = found.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["g-1"]);

    repo.update_costs(project, "g-1", 0.01, 0.02, 0.03).await.unwrap();
    assert!(repo.generations_without_cost(project, 10).await.unwrap().is_empty());
  }
}
