use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  model::trace::TRACES,
  page::{Page, PageRequest},
  predicate::{Aggregate, GroupQuery, OrderBy, Predicate},
  session::{Session, SessionFilter, session_from_row, session_query},
  store::RowStore,
};

/// Upper bound on [`SessionRepository::distinct_user_ids`].
pub const MAX_USER_IDS: u64 = 1000;

/// Read-only access to sessions, aggregated from traces on every call.
pub struct SessionRepository<S> {
  store: Arc<S>,
}

impl<S> Clone for SessionRepository<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

impl<S: RowStore> SessionRepository<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub async fn get_by_id(&self, project_id: Uuid, session_id: &str) -> Result<Session> {
    if session_id.is_empty() {
      return Err(Error::not_found("session", session_id));
    }
    let predicate = Predicate::for_project(project_id)?.eq("session_id", session_id);
    let row = self
      .store
      .aggregate(&TRACES, session_query(predicate).limit(1))
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| Error::not_found("session", session_id))?;
    session_from_row(row)
  }

  /// Sessions with recent activity first.
  pub async fn list(
    &self,
    filter: &SessionFilter,
    page: PageRequest,
  ) -> Result<Page<Session>> {
    let predicate = filter.predicate()?;

    let count = GroupQuery::new(predicate.clone())
      .aggregate("sessions", Aggregate::CountDistinct("session_id"));
    let total = match self.store.aggregate(&TRACES, count).await?.into_iter().next() {
      Some(mut row) => row.uint("sessions")?,
      None => 0,
    };

    let query = session_query(predicate)
      .limit(page.lookahead_limit())
      .offset(u64::from(page.offset));
    let sessions = self
      .store
      .aggregate(&TRACES, query)
      .await?
      .into_iter()
      .map(session_from_row)
      .collect::<Result<Vec<_>>>()?;

    debug!(total, returned = sessions.len(), "listed sessions");
    Ok(Page::from_lookahead(sessions, &page, total))
  }

  /// Non-empty user ids seen on session traces, sorted, capped at
  /// [`MAX_USER_IDS`].
  pub async fn distinct_user_ids(&self, project_id: Uuid) -> Result<Vec<String>> {
    let predicate = Predicate::for_project(project_id)?
      .ne("session_id", "")
      .ne("user_id", "");
    let query = GroupQuery::new(predicate)
      .group_by("user_id")
      .order([OrderBy::asc("user_id")])
      .limit(MAX_USER_IDS);
    self
      .store
      .aggregate(&TRACES, query)
      .await?
      .into_iter()
      .map(|mut row| row.text("user_id"))
      .collect()
  }
}
