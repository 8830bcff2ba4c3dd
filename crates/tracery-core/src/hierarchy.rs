//! Assemble a trace's flat observation list into a forest.
//!
//! Nodes live in one arena and refer to their children by index. Roots are
//! observations with no parent, a parent that is not in the input, or a parent
//! link that would close a cycle. Every input observation appears in the
//! forest exactly once, and siblings keep their input order.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::observation::Observation;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
  pub observation: Observation,
  pub children:    Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationForest {
  nodes: Vec<Node>,
  roots: Vec<usize>,
}

/// An owned, nested view of one tree, for serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationTree {
  #[serde(flatten)]
  pub observation: Observation,
  pub children:    Vec<ObservationTree>,
}

impl ObservationForest {
  pub fn assemble(observations: Vec<Observation>) -> Self {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(observations.len());
    for (i, obs) in observations.iter().enumerate() {
      index.entry(obs.id.as_str()).or_insert(i);
    }

    let parents: Vec<Option<usize>> = observations
      .iter()
      .enumerate()
      .map(|(i, obs)| {
        obs
          .parent_observation_id
          .as_deref()
          .filter(|p| !p.is_empty())
          .and_then(|p| index.get(p).copied())
          .filter(|&p| p != i)
      })
      .collect();
    drop(index);

    let mut nodes: Vec<Node> = observations
      .into_iter()
      .map(|observation| Node {
        observation,
        children: Vec::new(),
      })
      .collect();
    let mut roots = Vec::new();
    for (i, parent) in parents.iter().enumerate() {
      match parent {
        Some(p) => nodes[*p].children.push(i),
        None => roots.push(i),
      }
    }

    let mut forest = Self { nodes, roots };
    forest.break_cycles(&parents);
    forest
  }

  /// Promote one member of each unreachable cycle to a root. Nodes hanging
  /// off a cycle keep their parent.
  fn break_cycles(&mut self, parents: &[Option<usize>]) {
    let n = self.nodes.len();
    let mut seen = vec![false; n];
    for root in self.roots.clone() {
      self.mark(root, &mut seen);
    }
    let mut visited_from = vec![usize::MAX; n];
    for i in 0..n {
      if seen[i] {
        continue;
      }
      // Unreachable, so every ancestor is too and the parent chain loops.
      let mut member = i;
      while visited_from[member] != i {
        visited_from[member] = i;
        match parents[member] {
          Some(p) => member = p,
          None => break,
        }
      }
      if let Some(p) = parents[member] {
        self.nodes[p].children.retain(|&c| c != member);
      }
      self.roots.push(member);
      self.mark(member, &mut seen);
    }
    self.roots.sort_unstable();
  }

  fn mark(&self, start: usize, seen: &mut [bool]) {
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
      if std::mem::replace(&mut seen[i], true) {
        continue;
      }
      stack.extend(self.nodes[i].children.iter().copied());
    }
  }

  pub fn len(&self) -> usize { self.nodes.len() }

  pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

  pub fn node(&self, index: usize) -> Option<&Node> { self.nodes.get(index) }

  pub fn roots(&self) -> impl Iterator<Item = &Node> {
    self.roots.iter().map(|&i| &self.nodes[i])
  }

  pub fn children<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Node> {
    node.children.iter().map(|&i| &self.nodes[i])
  }

  /// Pre-order walk yielding each observation with its depth.
  pub fn walk(&self) -> Vec<(usize, &Observation)> {
    let mut out = Vec::with_capacity(self.nodes.len());
    let mut stack: Vec<(usize, usize)> =
      self.roots.iter().rev().map(|&r| (r, 0)).collect();
    while let Some((i, depth)) = stack.pop() {
      let node = &self.nodes[i];
      out.push((depth, &node.observation));
      stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
    }
    out
  }

  /// Nested trees, consuming the arena.
  pub fn into_trees(self) -> Vec<ObservationTree> {
    let mut slots: Vec<Option<Node>> = self.nodes.into_iter().map(Some).collect();
    self
      .roots
      .iter()
      .filter_map(|&r| build(&mut slots, r))
      .collect()
  }
}

fn build(slots: &mut [Option<Node>], i: usize) -> Option<ObservationTree> {
  let node = slots[i].take()?;
  let children = node
    .children
    .iter()
    .filter_map(|&c| build(slots, c))
    .collect();
  Some(ObservationTree {
    observation: node.observation,
    children,
  })
}
