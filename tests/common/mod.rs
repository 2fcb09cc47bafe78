#![allow(dead_code)]

pub use batchdag_test_utils::*;

use batchdag::ledger::{EventKind, Ledger, TaskState};

/// Task-state changes of `task`, in ledger order, starting with `pending`.
pub fn states_of(ledger: &Ledger, task: &str) -> Vec<TaskState> {
    ledger
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::TaskTransition { task_id, to, .. } if task_id == task => Some(to),
            _ => None,
        })
        .collect()
}

/// Largest number of tasks simultaneously `in_progress` according to the
/// ledger event stream.
pub fn peak_in_progress(ledger: &Ledger) -> usize {
    let mut current = 0usize;
    let mut peak = 0usize;
    for event in ledger.events() {
        if let Some((from, to)) = event.task_transition() {
            if to == TaskState::InProgress {
                current += 1;
                peak = peak.max(current);
            } else if from == Some(TaskState::InProgress) {
                current -= 1;
            }
        }
    }
    peak
}
