//! Offset pagination with a has-more lookahead.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 100;

/// Requested window. The limit is clamped to `1..=MAX_LIMIT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
  pub limit:  Option<u32>,
  #[serde(default)]
  pub offset: u32,
}

impl PageRequest {
  pub fn new(limit: u32, offset: u32) -> Self {
    Self {
      limit: Some(limit),
      offset,
    }
  }

  pub fn effective_limit(&self) -> u32 {
    self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
  }

  /// Rows to fetch: one more than the page so a following row can be seen.
  pub fn lookahead_limit(&self) -> u64 { u64::from(self.effective_limit()) + 1 }

  pub fn next(&self) -> Self {
    Self {
      limit:  self.limit,
      offset: self.offset.saturating_add(self.effective_limit()),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
  pub items:    Vec<T>,
  /// Matching rows across all pages.
  pub total:    u64,
  pub has_more: bool,
}

impl<T> Page<T> {
  /// Build a page from a lookahead fetch of up to `limit + 1` rows.
  pub fn from_lookahead(mut items: Vec<T>, request: &PageRequest, total: u64) -> Self {
    let limit = request.effective_limit() as usize;
    let has_more = items.len() > limit;
    items.truncate(limit);
    Self {
      items,
      total,
      has_more,
    }
  }

  pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
    Page {
      items:    self.items.into_iter().map(f).collect(),
      total:    self.total,
      has_more: self.has_more,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn limit_defaults_and_clamps() {
    assert_eq!(PageRequest::default().effective_limit(), 50);
    assert_eq!(PageRequest::new(0, 0).effective_limit(), 1);
    assert_eq!(PageRequest::new(500, 0).effective_limit(), 100);
    assert_eq!(PageRequest::new(20, 0).lookahead_limit(), 21);
  }

  #[test]
  fn lookahead_detects_following_row() {
    let req = PageRequest::new(2, 0);
    let page = Page::from_lookahead(vec![1, 2, 3], &req, 3);
    assert_eq!(page.items, vec![1, 2]);
    assert!(page.has_more);

    let page = Page::from_lookahead(vec![1, 2], &req, 2);
    assert!(!page.has_more);
  }

  #[test]
  fn next_advances_by_effective_limit() {
    let req = PageRequest::new(10, 5);
    assert_eq!(req.next().offset, 15);
  }
}
