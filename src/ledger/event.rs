// src/ledger/event.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{ExecutorId, TaskId};
use crate::ledger::state::{BatchState, RunStatus, TaskState};
use crate::types::GateKind;

/// One appended ledger record, as delivered to progress subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the ledger; strictly increasing.
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// A task changed state. `from` is `None` when the task is registered.
    TaskTransition {
        task_id: TaskId,
        from: Option<TaskState>,
        to: TaskState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    BatchTransition {
        from: BatchState,
        to: BatchState,
    },
    /// An attempt was handed to `executor` after routing.
    TaskDispatched {
        task_id: TaskId,
        executor: ExecutorId,
        attempt: u32,
    },
    /// The router dispatched a task to the fallback executor.
    ExecutorSubstituted {
        task_id: TaskId,
        requested: ExecutorId,
        fallback: ExecutorId,
    },
    /// A quality gate ran. `batch_index` is unset for the end-of-run round.
    GateChecked {
        gate: GateKind,
        passed: bool,
        blocking: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    RunFinished {
        status: RunStatus,
    },
}

impl LedgerEvent {
    pub fn task_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::TaskTransition { task_id, .. }
            | EventKind::TaskDispatched { task_id, .. }
            | EventKind::ExecutorSubstituted { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// `(from, to)` if this is a task transition.
    pub fn task_transition(&self) -> Option<(Option<TaskState>, TaskState)> {
        match &self.kind {
            EventKind::TaskTransition { from, to, .. } => Some((*from, *to)),
            _ => None,
        }
    }

    /// Whether this event starts a dispatch attempt of `task`.
    pub fn is_dispatch_of(&self, task: &str) -> bool {
        matches!(
            &self.kind,
            EventKind::TaskTransition { task_id, to: TaskState::InProgress, .. } if task_id == task
        )
    }
}
