//! Tenant-scoped query construction.
//!
//! A [`Predicate`] is an ordered list of [`Condition`]s. Except for the
//! sweeper's cross-tenant mode, the first condition is always
//! `project_id = ?`; there is no public way to build a predicate without it.
//! Optional filter inputs that are absent or empty add nothing.
//!
//! Values never appear in rendered SQL. Backends render each condition to a
//! placeholder fragment and bind the carried values in order.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Error, Result,
  row::{ColumnKind, PROJECT_ID, Table, Value},
};

// ─── Conditions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
  Gt,
  Gte,
  Lt,
  Lte,
}

impl RangeOp {
  pub fn as_sql(self) -> &'static str {
    match self {
      Self::Gt => ">",
      Self::Gte => ">=",
      Self::Lt => "<",
      Self::Lte => "<=",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
  Equals {
    column: &'static str,
    value:  Value,
  },
  NotEquals {
    column: &'static str,
    value:  Value,
  },
  Range {
    column: &'static str,
    op:     RangeOp,
    value:  Value,
  },
  /// Case-sensitive substring match. The needle is matched literally.
  Substring {
    column: &'static str,
    needle: String,
  },
  /// Substring match against any of several columns.
  Search {
    columns: &'static [&'static str],
    needle:  String,
  },
  /// A list column shares at least one element with `values`.
  AnyOf {
    column: &'static str,
    values: Vec<String>,
  },
  InList {
    column: &'static str,
    values: Vec<Value>,
  },
  IsNull {
    column: &'static str,
  },
  NotNull {
    column: &'static str,
  },
  /// No live trace with the same `project_id` has the id held in
  /// `trace_column`.
  Orphaned {
    trace_column: &'static str,
    parent:       &'static Table,
  },
}

// ─── Ordering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Asc,
  Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
  pub column:    &'static str,
  pub direction: Direction,
}

impl OrderBy {
  pub const fn asc(column: &'static str) -> Self {
    Self {
      column,
      direction: Direction::Asc,
    }
  }

  pub const fn desc(column: &'static str) -> Self {
    Self {
      column,
      direction: Direction::Desc,
    }
  }

  /// Resolve a caller-supplied sort key against a table's whitelist.
  ///
  /// Unknown columns are rejected rather than interpolated.
  pub fn parse(table: &Table, column: &str, descending: bool) -> Result<Self> {
    let column = table
      .sortable
      .iter()
      .find(|c| **c == column)
      .copied()
      .ok_or_else(|| {
        Error::InvalidArgument(format!(
          "cannot order {} by {column:?}",
          table.name
        ))
      })?;
    Ok(if descending {
      Self::desc(column)
    } else {
      Self::asc(column)
    })
  }
}

// ─── Predicate ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
  conditions: Vec<Condition>,
  tenant:     Option<Uuid>,
}

impl Predicate {
  /// Start a predicate scoped to one project. The nil UUID is rejected.
  pub fn for_project(project_id: Uuid) -> Result<Self> {
    if project_id.is_nil() {
      return Err(Error::InvalidArgument(
        "project_id must not be nil".to_owned(),
      ));
    }
    Ok(Self {
      conditions: vec![Condition::Equals {
        column: PROJECT_ID,
        value:  Value::Uuid(project_id),
      }],
      tenant:     Some(project_id),
    })
  }

  /// A predicate spanning every project.
  ///
  /// Only the sweeper's cross-tenant passes use this.
  pub fn all_tenants() -> Self {
    Self {
      conditions: Vec::new(),
      tenant:     None,
    }
  }

  /// `for_project` when a project is given, otherwise `all_tenants`.
  pub fn scoped(project_id: Option<Uuid>) -> Result<Self> {
    project_id.map_or_else(|| Ok(Self::all_tenants()), Self::for_project)
  }

  pub fn project_id(&self) -> Option<Uuid> { self.tenant }

  pub fn conditions(&self) -> &[Condition] { &self.conditions }

  pub fn and(mut self, condition: Condition) -> Self {
    self.conditions.push(condition);
    self
  }

  pub fn eq(self, column: &'static str, value: impl Into<Value>) -> Self {
    self.and(Condition::Equals {
      column,
      value: value.into(),
    })
  }

  pub fn eq_opt<V: Into<Value>>(
    self,
    column: &'static str,
    value: Option<V>,
  ) -> Self {
    match value {
      Some(v) => self.eq(column, v),
      None => self,
    }
  }

  pub fn ne(self, column: &'static str, value: impl Into<Value>) -> Self {
    self.and(Condition::NotEquals {
      column,
      value: value.into(),
    })
  }

  pub fn range(
    self,
    column: &'static str,
    op: RangeOp,
    value: impl Into<Value>,
  ) -> Self {
    self.and(Condition::Range {
      column,
      op,
      value: value.into(),
    })
  }

  pub fn range_opt<V: Into<Value>>(
    self,
    column: &'static str,
    op: RangeOp,
    value: Option<V>,
  ) -> Self {
    match value {
      Some(v) => self.range(column, op, v),
      None => self,
    }
  }

  /// Inclusive time window; either bound may be open.
  pub fn between(
    self,
    column: &'static str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
  ) -> Self {
    self
      .range_opt(column, RangeOp::Gte, from)
      .range_opt(column, RangeOp::Lte, to)
  }

  /// Substring match; `None` and the empty string add nothing.
  pub fn contains(self, column: &'static str, needle: Option<&str>) -> Self {
    match needle.filter(|n| !n.is_empty()) {
      Some(n) => self.and(Condition::Substring {
        column,
        needle: n.to_owned(),
      }),
      None => self,
    }
  }

  pub fn search(
    self,
    columns: &'static [&'static str],
    needle: Option<&str>,
  ) -> Self {
    match needle.filter(|n| !n.is_empty()) {
      Some(n) => self.and(Condition::Search {
        columns,
        needle: n.to_owned(),
      }),
      None => self,
    }
  }

  /// Set intersection against a list column; an empty set adds nothing.
  pub fn any_of(self, column: &'static str, values: &[String]) -> Self {
    if values.is_empty() {
      return self;
    }
    self.and(Condition::AnyOf {
      column,
      values: values.to_vec(),
    })
  }

  /// Membership test; an empty set adds nothing.
  pub fn in_list<V, I>(self, column: &'static str, values: I) -> Self
  where
    V: Into<Value>,
    I: IntoIterator<Item = V>,
  {
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    if values.is_empty() {
      return self;
    }
    self.and(Condition::InList { column, values })
  }

  pub fn is_null(self, column: &'static str) -> Self {
    self.and(Condition::IsNull { column })
  }

  pub fn not_null(self, column: &'static str) -> Self {
    self.and(Condition::NotNull { column })
  }

  /// Rows of a child table whose trace no longer exists.
  pub fn orphaned(self, child: &Table, parent: &'static Table) -> Result<Self> {
    let trace_column = child.trace_column.ok_or_else(|| {
      Error::InvalidArgument(format!("{} has no trace column", child.name))
    })?;
    Ok(self.and(Condition::Orphaned {
      trace_column,
      parent,
    }))
  }

  /// Every column this predicate touches must exist in `table`.
  pub fn check_columns(&self, table: &Table) -> Result<()> {
    for condition in &self.conditions {
      let mut columns: Vec<&str> = Vec::new();
      match condition {
        Condition::Equals { column, .. }
        | Condition::NotEquals { column, .. }
        | Condition::Range { column, .. }
        | Condition::Substring { column, .. }
        | Condition::InList { column, .. }
        | Condition::IsNull { column }
        | Condition::NotNull { column } => columns.push(*column),
        Condition::AnyOf { column, .. } => {
          if table.column(column).map(|c| c.kind) != Some(ColumnKind::List) {
            return Err(Error::InvalidArgument(format!(
              "{}.{column} is not a list column",
              table.name
            )));
          }
        }
        Condition::Search { columns: cs, .. } => columns.extend(cs.iter()),
        Condition::Orphaned { trace_column, .. } => {
          columns.push(*trace_column)
        }
      }
      if let Some(missing) = columns.into_iter().find(|c| !table.has_column(c)) {
        return Err(Error::InvalidArgument(format!(
          "{} has no column {missing:?}",
          table.name
        )));
      }
    }
    Ok(())
  }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// A row selection: predicate, ordering and window.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
  pub predicate: Predicate,
  pub order_by:  Vec<OrderBy>,
  pub limit:     Option<u64>,
  pub offset:    u64,
}

impl Select {
  pub fn new(predicate: Predicate) -> Self {
    Self {
      predicate,
      order_by: Vec::new(),
      limit: None,
      offset: 0,
    }
  }

  pub fn order(mut self, order_by: impl IntoIterator<Item = OrderBy>) -> Self {
    self.order_by.extend(order_by);
    self
  }

  pub fn limit(mut self, limit: u64) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: u64) -> Self {
    self.offset = offset;
    self
  }
}

/// An aggregate expression over the live rows of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
  Count,
  CountIf(Condition),
  CountDistinct(&'static str),
  /// Sum of a numeric column; an empty input sums to zero.
  Sum(&'static str),
  Avg(&'static str),
  Min(&'static str),
  Max(&'static str),
  /// Some value of the column within the group. Backends pick the maximum so
  /// the choice is deterministic.
  Any(&'static str),
  /// Distinct non-null values of the column as a list.
  CollectDistinct(&'static str),
}

impl Aggregate {
  /// Storage class of the aggregate's result.
  pub fn result_kind(&self, table: &Table) -> ColumnKind {
    let kind_of = |c: &str| table.column(c).map_or(ColumnKind::Text, |c| c.kind);
    match self {
      Self::Count | Self::CountIf(_) | Self::CountDistinct(_) => ColumnKind::Int,
      Self::Sum(c) => match kind_of(c) {
        ColumnKind::Int | ColumnKind::Bool => ColumnKind::Int,
        _ => ColumnKind::Float,
      },
      Self::Avg(_) => ColumnKind::Float,
      Self::Min(c) | Self::Max(c) | Self::Any(c) => kind_of(c),
      Self::CollectDistinct(_) => ColumnKind::List,
    }
  }
}

/// A grouped aggregation. Output rows hold the grouping columns plus one
/// column per named aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupQuery {
  pub predicate:  Predicate,
  pub group_by:   Vec<&'static str>,
  pub aggregates: Vec<(&'static str, Aggregate)>,
  /// May name grouping columns or aggregate aliases.
  pub order_by:   Vec<OrderBy>,
  pub limit:      Option<u64>,
  pub offset:     u64,
}

impl GroupQuery {
  pub fn new(predicate: Predicate) -> Self {
    Self {
      predicate,
      group_by: Vec::new(),
      aggregates: Vec::new(),
      order_by: Vec::new(),
      limit: None,
      offset: 0,
    }
  }

  pub fn group_by(mut self, column: &'static str) -> Self {
    self.group_by.push(column);
    self
  }

  pub fn aggregate(mut self, alias: &'static str, aggregate: Aggregate) -> Self {
    self.aggregates.push((alias, aggregate));
    self
  }

  pub fn order(mut self, order_by: impl IntoIterator<Item = OrderBy>) -> Self {
    self.order_by.extend(order_by);
    self
  }

  pub fn limit(mut self, limit: u64) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: u64) -> Self {
    self.offset = offset;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::trace::{TRACES, Trace};
  use crate::record::Record as _;

  fn project() -> Uuid { Uuid::new_v4() }

  #[test]
  fn project_condition_comes_first() {
    let p = project();
    let predicate = Predicate::for_project(p)
      .unwrap()
      .eq("name", "build")
      .contains("user_id", Some("ann"));
    assert_eq!(predicate.conditions().len(), 3);
    assert_eq!(predicate.conditions()[0], Condition::Equals {
      column: PROJECT_ID,
      value:  Value::Uuid(p),
    });
    assert_eq!(predicate.project_id(), Some(p));
  }

  #[test]
  fn nil_project_is_rejected() {
    let err = Predicate::for_project(Uuid::nil()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
  }

  #[test]
  fn absent_and_empty_inputs_add_nothing() {
    let predicate = Predicate::for_project(project())
      .unwrap()
      .eq_opt("name", None::<String>)
      .contains("name", Some(""))
      .contains("name", None)
      .any_of("tags", &[])
      .in_list("id", Vec::<String>::new())
      .between("start_time", None, None)
      .search(&["name"], Some(""));
    assert_eq!(predicate.conditions().len(), 1);
  }

  #[test]
  fn all_tenants_has_no_project_condition() {
    let predicate = Predicate::all_tenants();
    assert!(predicate.conditions().is_empty());
    assert_eq!(predicate.project_id(), None);
  }

  #[test]
  fn check_columns_rejects_unknown_columns() {
    let predicate = Predicate::for_project(project())
      .unwrap()
      .eq("not_a_column", 1i64);
    assert!(predicate.check_columns(Trace::TABLE).is_err());
  }

  #[test]
  fn any_of_requires_a_list_column() {
    let tags = vec!["a".to_owned()];
    let ok = Predicate::for_project(project()).unwrap().any_of("tags", &tags);
    assert!(ok.check_columns(&TRACES).is_ok());
    let bad = Predicate::for_project(project()).unwrap().any_of("name", &tags);
    assert!(bad.check_columns(&TRACES).is_err());
  }

  #[test]
  fn order_by_is_whitelisted() {
    assert_eq!(
      OrderBy::parse(&TRACES, "total_cost", true).unwrap(),
      OrderBy::desc("total_cost")
    );
    assert!(OrderBy::parse(&TRACES, "input; DROP TABLE traces", false).is_err());
  }

  #[test]
  fn aggregate_result_kinds() {
    assert_eq!(Aggregate::Count.result_kind(&TRACES), ColumnKind::Int);
    assert_eq!(
      Aggregate::Sum("total_tokens").result_kind(&TRACES),
      ColumnKind::Int
    );
    assert_eq!(
      Aggregate::Sum("total_cost").result_kind(&TRACES),
      ColumnKind::Float
    );
    assert_eq!(
      Aggregate::Min("start_time").result_kind(&TRACES),
      ColumnKind::Timestamp
    );
    assert_eq!(
      Aggregate::CollectDistinct("id").result_kind(&TRACES),
      ColumnKind::List
    );
  }
}
