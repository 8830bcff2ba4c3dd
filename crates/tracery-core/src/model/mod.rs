//! Entity models and their table descriptions.
//!
//! Every entity is keyed by `(project_id, id)` and versioned by `updated_at`.

pub mod checkpoint;
pub mod ci_run;
pub mod file_operation;
pub mod git_link;
pub mod observation;
pub mod score;
pub mod terminal_command;
pub mod trace;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Severity attached to traces and observations.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
  Debug,
  #[default]
  Default,
  Warning,
  Error,
}

/// Milliseconds between two instants, or 0 when the end is unknown or
/// precedes the start.
pub(crate) fn elapsed_ms(
  start: chrono::DateTime<chrono::Utc>,
  end: Option<chrono::DateTime<chrono::Utc>>,
) -> f64 {
  end
    .map(|end| (end - start).num_microseconds().unwrap_or(0) as f64 / 1000.0)
    .filter(|ms| *ms > 0.0)
    .unwrap_or(0.0)
}

/// Fail when `end` is set and precedes `start`.
pub(crate) fn check_span(
  entity: &str,
  id: &str,
  start: chrono::DateTime<chrono::Utc>,
  end: Option<chrono::DateTime<chrono::Utc>>,
) -> crate::Result<()> {
  match end {
    Some(end) if end < start => Err(crate::Error::InvalidArgument(format!(
      "{entity} {id} ends at {end} before it starts at {start}"
    ))),
    _ => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, Utc};

  use super::*;

  #[test]
  fn level_round_trips_through_text() {
    assert_eq!(Level::Warning.as_ref(), "WARNING");
    assert_eq!("ERROR".parse::<Level>().unwrap(), Level::Error);
    assert!("loud".parse::<Level>().is_err());
  }

  #[test]
  fn elapsed_ignores_missing_and_negative_ends() {
    let start = Utc::now();
    assert_eq!(elapsed_ms(start, None), 0.0);
    assert_eq!(elapsed_ms(start, Some(start - Duration::seconds(1))), 0.0);
    assert_eq!(elapsed_ms(start, Some(start + Duration::milliseconds(1500))), 1500.0);
  }
}
