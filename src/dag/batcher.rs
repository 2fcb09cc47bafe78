// src/dag/batcher.rs

//! Level partitioning of a [`TaskGraph`] into ordered batches.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::graph::TaskGraph;
use crate::dag::task::TaskId;
use crate::errors::{BatchdagError, Result};
use crate::types::ExecutionMode;

/// One synchronization unit of a run.
///
/// Every predecessor of a task in batch `index` sits in a batch with a
/// strictly smaller index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub index: usize,
    /// Partition level the tasks were extracted at.
    pub level: usize,
    pub mode: ExecutionMode,
    pub tasks: Vec<TaskId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task: &str) -> bool {
        self.tasks.iter().any(|t| t == task)
    }
}

/// Computes the batch partition of a graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct Batcher {
    mode: ExecutionMode,
    first_index: usize,
}

impl Batcher {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            first_index: 0,
        }
    }

    /// Start numbering batches at `first_index` (used when resuming).
    pub fn starting_at(mut self, first_index: usize) -> Self {
        self.first_index = first_index;
        self
    }

    /// Partition `graph` into level-ordered batches.
    ///
    /// Each iteration extracts every task whose remaining in-degree is zero,
    /// in insertion order. If tasks remain that can never reach zero, the
    /// graph has a cycle and no batch is returned: this is the only place a
    /// cycle is detected.
    pub fn partition(&self, graph: &TaskGraph) -> Result<Vec<Batch>> {
        let mut in_degree: HashMap<&str, usize> = graph
            .tasks()
            .map(|t| (t.id.as_str(), t.predecessors.len()))
            .collect();

        let mut levels: Vec<Vec<TaskId>> = Vec::new();
        let mut assigned = 0usize;

        while assigned < graph.len() {
            let ready: Vec<&str> = graph
                .task_ids()
                .filter(|id| in_degree.get(id) == Some(&0))
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = in_degree.keys().copied().collect();
                return Err(BatchdagError::GraphCycle(describe_cycle(graph, &stuck)));
            }

            for id in &ready {
                in_degree.remove(id);
                for dependent in graph.dependents_of(id) {
                    if let Some(d) = in_degree.get_mut(dependent.as_str()) {
                        *d = d.saturating_sub(1);
                    }
                }
            }

            assigned += ready.len();
            levels.push(ready.into_iter().map(str::to_string).collect());
        }

        let batches = self.build_batches(levels);
        debug!(
            batches = batches.len(),
            tasks = graph.len(),
            mode = %self.mode,
            "graph partitioned"
        );
        Ok(batches)
    }

    fn build_batches(&self, levels: Vec<Vec<TaskId>>) -> Vec<Batch> {
        let mut batches = Vec::new();
        for (level, tasks) in levels.into_iter().enumerate() {
            match self.mode {
                ExecutionMode::Parallel => batches.push(Batch {
                    index: self.first_index + batches.len(),
                    level,
                    mode: ExecutionMode::Parallel,
                    tasks,
                }),
                ExecutionMode::Serial => {
                    for task in tasks {
                        batches.push(Batch {
                            index: self.first_index + batches.len(),
                            level,
                            mode: ExecutionMode::Serial,
                            tasks: vec![task],
                        });
                    }
                }
            }
        }
        batches
    }
}

/// Name the tasks on a cycle among `stuck`. Tasks that are only blocked
/// behind the cycle are left out.
fn describe_cycle(graph: &TaskGraph, stuck: &[&str]) -> String {
    let mut g: DiGraphMap<&str, ()> = DiGraphMap::new();
    for &id in stuck {
        g.add_node(id);
    }
    for &id in stuck {
        for dependent in graph.dependents_of(id) {
            if g.contains_node(dependent.as_str()) {
                g.add_edge(id, dependent.as_str(), ());
            }
        }
    }

    let mut on_cycle: Vec<&str> = tarjan_scc(&g)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .collect();
    if on_cycle.is_empty() {
        on_cycle = stuck.to_vec();
    }
    on_cycle.sort_by_key(|id| graph.position(id));
    format!("tasks {} depend on each other", on_cycle.join(", "))
}

/// Partition with parallel batches numbered from zero.
pub fn partition(graph: &TaskGraph) -> Result<Vec<Batch>> {
    Batcher::new(ExecutionMode::Parallel).partition(graph)
}
