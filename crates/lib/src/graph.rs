//! The stage dependency graph.
//!
//! Stages are nodes; an edge runs from a dependency to its dependent, tagged
//! with whether the dependent layers on it (`Base`) or copies out of it
//! (`CopyFrom`). Nodes are never removed, so a node's index is its position
//! in declaration order, which is what every ordering tie-break uses.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use thiserror::Error;

use crate::consts::LOCAL_SOURCE;
use crate::stage::{EdgeKind, Stage, StageId};

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("stage '{0}' is declared more than once")]
  DuplicateStage(StageId),

  #[error("stage '{stage}' references undeclared stage '{missing}'")]
  UnknownBase { stage: StageId, missing: StageId },

  #[error("dependency cycle between stages: {}", join_ids(.stages))]
  CycleDetected { stages: Vec<StageId> },

  #[error("no stage named '{0}'")]
  UnknownStage(StageId),

  #[error("stage name '{0}' is reserved")]
  ReservedName(StageId),
}

fn join_ids(ids: &[StageId]) -> String {
  ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", ")
}

/// A graph of stages built in declaration order.
#[derive(Debug, Default)]
pub struct BuildGraph {
  graph: DiGraph<StageId, EdgeKind>,
  nodes: HashMap<StageId, NodeIndex>,
  stages: Vec<Stage>,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare a stage. Every stage it names must already be declared.
  ///
  /// Because dependencies must precede their dependents, a graph built only
  /// through `add_stage` is acyclic.
  pub fn add_stage(&mut self, stage: Stage) -> Result<(), GraphError> {
    self.check_name(&stage.name)?;

    let deps = stage.dependencies();
    for (dep, _) in &deps {
      if !self.nodes.contains_key(dep) {
        return Err(GraphError::UnknownBase {
          stage: stage.name.clone(),
          missing: dep.clone(),
        });
      }
    }

    let idx = self.graph.add_node(stage.name.clone());
    for (dep, kind) in deps {
      self.graph.add_edge(self.nodes[&dep], idx, kind);
    }
    self.nodes.insert(stage.name.clone(), idx);
    self.stages.push(stage);
    Ok(())
  }

  /// Build a graph from a full stage list, allowing forward references.
  ///
  /// Cycles are not rejected here; `resolve_order` reports them.
  pub fn from_stages(stages: impl IntoIterator<Item = Stage>) -> Result<Self, GraphError> {
    let mut graph = Self::new();

    // First pass: declare every name
    for stage in stages {
      graph.check_name(&stage.name)?;
      let idx = graph.graph.add_node(stage.name.clone());
      graph.nodes.insert(stage.name.clone(), idx);
      graph.stages.push(stage);
    }

    // Second pass: wire dependencies
    for (position, stage) in graph.stages.iter().enumerate() {
      let idx = NodeIndex::new(position);
      for (dep, kind) in stage.dependencies() {
        let dep_idx = *graph.nodes.get(&dep).ok_or_else(|| GraphError::UnknownBase {
          stage: stage.name.clone(),
          missing: dep.clone(),
        })?;
        graph.graph.add_edge(dep_idx, idx, kind);
      }
    }

    Ok(graph)
  }

  fn check_name(&self, name: &StageId) -> Result<(), GraphError> {
    if name.0 == LOCAL_SOURCE {
      return Err(GraphError::ReservedName(name.clone()));
    }
    if self.nodes.contains_key(name) {
      return Err(GraphError::DuplicateStage(name.clone()));
    }
    Ok(())
  }

  fn index(&self, id: &StageId) -> Result<NodeIndex, GraphError> {
    self.nodes.get(id).copied().ok_or_else(|| GraphError::UnknownStage(id.clone()))
  }

  pub fn stage(&self, id: &StageId) -> Option<&Stage> {
    self.nodes.get(id).map(|idx| &self.stages[idx.index()])
  }

  /// All stages in declaration order.
  pub fn stages(&self) -> &[Stage] {
    &self.stages
  }

  pub fn contains(&self, id: &StageId) -> bool {
    self.nodes.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  /// Direct dependencies of a stage, base first.
  pub fn dependencies(&self, id: &StageId) -> Vec<StageId> {
    self
      .stage(id)
      .map(|stage| stage.dependencies().into_iter().map(|(dep, _)| dep).collect())
      .unwrap_or_default()
  }

  /// Stages that read directly from `id`, in declaration order.
  pub fn dependents(&self, id: &StageId) -> Vec<StageId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    let mut dependents: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
    dependents.sort();
    dependents.dedup();
    dependents.into_iter().map(|n| self.graph[n].clone()).collect()
  }

  /// All stages in an order where every dependency precedes its dependents.
  ///
  /// Among stages that are ready at the same time, the one declared first
  /// comes first, so the order is fully determined by the declarations.
  pub fn resolve_order(&self) -> Result<Vec<StageId>, GraphError> {
    let mut in_degree: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.edges_directed(idx, Direction::Incoming).count())
      .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
      .graph
      .node_indices()
      .filter(|idx| in_degree[idx.index()] == 0)
      .map(Reverse)
      .collect();

    let mut order = Vec::with_capacity(self.stages.len());
    while let Some(Reverse(idx)) = ready.pop() {
      order.push(self.graph[idx].clone());
      for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        let degree = &mut in_degree[dependent.index()];
        *degree -= 1;
        if *degree == 0 {
          ready.push(Reverse(dependent));
        }
      }
    }

    if order.len() < self.stages.len() {
      return Err(GraphError::CycleDetected {
        stages: self.cycle_members(),
      });
    }
    Ok(order)
  }

  /// Stages on some cycle, in declaration order. A stage depending on itself counts.
  fn cycle_members(&self) -> Vec<StageId> {
    let mut members: Vec<NodeIndex> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|component| component.len() > 1 || self.graph.contains_edge(component[0], component[0]))
      .flatten()
      .collect();
    members.sort();
    members.into_iter().map(|idx| self.graph[idx].clone()).collect()
  }

  /// `terminal` and everything it transitively depends on.
  pub fn closure(&self, terminal: &StageId) -> Result<HashSet<StageId>, GraphError> {
    let start = self.index(terminal)?;
    let reversed = Reversed(&self.graph);
    let mut dfs = Dfs::new(reversed, start);
    let mut reached = HashSet::new();
    while let Some(idx) = dfs.next(reversed) {
      reached.insert(self.graph[idx].clone());
    }
    Ok(reached)
  }

  /// Declared stages the terminal never reads from, in declaration order.
  pub fn unreachable_from(&self, terminal: &StageId) -> Result<Vec<StageId>, GraphError> {
    let closure = self.closure(terminal)?;
    Ok(
      self
        .stages
        .iter()
        .filter(|stage| !closure.contains(&stage.name))
        .map(|stage| stage.name.clone())
        .collect(),
    )
  }

  /// Stages needed for `terminal`, grouped into waves that can run in parallel.
  ///
  /// Every stage's dependencies sit in earlier waves. Within a wave stages
  /// keep declaration order.
  pub fn waves(&self, terminal: &StageId) -> Result<Vec<Vec<StageId>>, GraphError> {
    let closure = self.closure(terminal)?;
    let order = self.resolve_order()?;

    let mut level: HashMap<&StageId, usize> = HashMap::new();
    let mut waves: Vec<Vec<NodeIndex>> = Vec::new();

    for id in order.iter().filter(|id| closure.contains(*id)) {
      let wave = self
        .dependencies(id)
        .iter()
        .filter_map(|dep| level.get(dep))
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(id, wave);
      if waves.len() <= wave {
        waves.resize_with(wave + 1, Vec::new);
      }
      waves[wave].push(self.nodes[id]);
    }

    Ok(
      waves
        .into_iter()
        .map(|mut wave| {
          wave.sort();
          wave.into_iter().map(|idx| self.graph[idx].clone()).collect()
        })
        .collect(),
    )
  }
}
