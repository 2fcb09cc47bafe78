// src/dag/task.rs

//! Task metadata as ingested from upstream planning and as held by the graph.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical task identity type used throughout the crate.
pub type TaskId = String;

/// Name of an executor backend; resolved to a capability by the router.
pub type ExecutorId = String;

/// One work item as produced by the upstream planning step.
///
/// Field names follow the ingestion format:
///
/// ```json
/// {"id": "api", "label": "Build API", "executor": "codex",
///  "predecessors": ["schema"], "estimatedDurationMinutes": 20,
///  "outputRef": "src/api.rs"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub id: TaskId,

    #[serde(default)]
    pub label: String,

    pub executor: ExecutorId,

    #[serde(default)]
    pub predecessors: Vec<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
}

/// A validated task inside a [`crate::dag::TaskGraph`].
///
/// The task's current state lives in the ledger, not here; the graph is
/// read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub label: String,
    pub executor: ExecutorId,
    /// Direct dependencies, deduplicated, in declaration order.
    pub predecessors: Vec<TaskId>,
    pub estimated_duration: Option<Duration>,
    pub output_ref: Option<String>,
}

impl Task {
    /// Label for logs; falls back to the id when the label is empty.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    pub fn to_spec(&self) -> TaskSpec {
        TaskSpec {
            id: self.id.clone(),
            label: self.label.clone(),
            executor: self.executor.clone(),
            predecessors: self.predecessors.clone(),
            estimated_duration_minutes: self
                .estimated_duration
                .map(|d| d.as_secs_f64() / 60.0),
            output_ref: self.output_ref.clone(),
        }
    }
}
