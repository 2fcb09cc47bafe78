// src/ledger/state.rs

//! Task, batch and run state lattices.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-task state recorded in the ledger.
///
/// Allowed transitions:
///
/// ```text
/// pending -> in_progress -> completed
///                        -> failed -> retrying -> in_progress
///                                  -> skipped
/// ```
///
/// `completed` and `skipped` have no outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Retrying,
    Skipped,
}

impl TaskState {
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, Retrying)
                | (Failed, Skipped)
                | (Retrying, InProgress)
        )
    }

    /// Terminal states that are never dispatched again, even on resume.
    pub fn is_settled(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
            TaskState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-batch state recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    InProgress,
    Completed,
    Aborted,
    Cancelled,
}

impl BatchState {
    /// An aborted or cancelled batch may be re-entered when a run resumes.
    pub fn can_transition_to(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Aborted, InProgress)
                | (Cancelled, InProgress)
                | (InProgress, Completed)
                | (InProgress, Aborted)
                | (InProgress, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::InProgress => "in_progress",
            BatchState::Completed => "completed",
            BatchState::Aborted => "aborted",
            BatchState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed.
    Completed,
    /// Some tasks ended `failed` or `skipped` under a non-fail-fast policy.
    PartiallyCompleted,
    /// A failure (fail_fast, or an `abort` decision) stopped the run.
    Aborted,
    /// An external cancellation stopped the run.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::PartiallyCompleted => "partially_completed",
            RunStatus::Aborted => "aborted",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskState; 6] = [
        TaskState::Pending,
        TaskState::InProgress,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Retrying,
        TaskState::Skipped,
    ];

    #[test]
    fn completed_and_skipped_are_sinks() {
        for next in ALL {
            assert!(!TaskState::Completed.can_transition_to(next));
            assert!(!TaskState::Skipped.can_transition_to(next));
        }
    }

    #[test]
    fn retry_path_goes_through_retrying() {
        assert!(TaskState::Failed.can_transition_to(TaskState::Retrying));
        assert!(TaskState::Retrying.can_transition_to(TaskState::InProgress));
        assert!(!TaskState::Failed.can_transition_to(TaskState::InProgress));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn states_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::PartiallyCompleted).unwrap(),
            "\"partially_completed\""
        );
    }
}
