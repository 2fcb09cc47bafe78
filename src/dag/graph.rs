// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::dag::task::{Task, TaskId, TaskSpec};
use crate::errors::{BatchdagError, Result};

static TASK_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:/-]*$").expect("task id pattern is valid")
});

/// Immutable task graph for one orchestration run.
///
/// Tasks keep their insertion order, which is the deterministic tie-break
/// used by the batcher. Construction rejects malformed input; cycles are
/// reported by the batcher.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, Task>,
    /// Direct dependents: tasks that list the key as a predecessor.
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    /// Build and validate a graph from upstream task specs.
    pub fn from_specs(specs: Vec<TaskSpec>) -> Result<Self> {
        let mut order = Vec::with_capacity(specs.len());
        let mut tasks: HashMap<TaskId, Task> = HashMap::with_capacity(specs.len());

        for spec in specs {
            let task = task_from_spec(spec)?;
            if tasks.contains_key(&task.id) {
                return Err(BatchdagError::MalformedGraph(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
            order.push(task.id.clone());
            tasks.insert(task.id.clone(), task);
        }

        let mut dependents: HashMap<TaskId, Vec<TaskId>> =
            order.iter().map(|id| (id.clone(), Vec::new())).collect();

        for id in &order {
            let task = &tasks[id];
            for pred in &task.predecessors {
                if pred == id {
                    return Err(BatchdagError::MalformedGraph(format!(
                        "task '{}' cannot depend on itself",
                        id
                    )));
                }
                match dependents.get_mut(pred) {
                    Some(list) => list.push(id.clone()),
                    None => {
                        return Err(BatchdagError::MalformedGraph(format!(
                            "task '{}' has unknown predecessor '{}'",
                            id, pred
                        )));
                    }
                }
            }
        }

        debug!(tasks = order.len(), "task graph constructed");
        Ok(Self {
            order,
            tasks,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(move |id| &self.tasks[id])
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Position of a task in insertion order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|t| t == id)
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.dependents
            .get(id)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }
}

fn task_from_spec(spec: TaskSpec) -> Result<Task> {
    if !TASK_ID_RE.is_match(&spec.id) {
        return Err(BatchdagError::MalformedGraph(format!(
            "invalid task id {:?} (allowed: letters, digits, '_', '.', ':', '/', '-')",
            spec.id
        )));
    }
    if spec.executor.trim().is_empty() {
        return Err(BatchdagError::MalformedGraph(format!(
            "task '{}' has no executor",
            spec.id
        )));
    }

    let estimated_duration = match spec.estimated_duration_minutes {
        None => None,
        Some(m) => match Duration::try_from_secs_f64(m * 60.0) {
            Ok(d) => Some(d),
            Err(_) => {
                return Err(BatchdagError::MalformedGraph(format!(
                    "task '{}' has invalid estimatedDurationMinutes {}",
                    spec.id, m
                )));
            }
        },
    };

    let mut seen = HashSet::new();
    let predecessors: Vec<TaskId> = spec
        .predecessors
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect();

    Ok(Task {
        id: spec.id,
        label: spec.label,
        executor: spec.executor,
        predecessors,
        estimated_duration,
        output_ref: spec.output_ref,
    })
}
