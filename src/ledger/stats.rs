// src/ledger/stats.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::dag::{ExecutorId, TaskId};
use crate::ledger::event::{EventKind, LedgerEvent};
use crate::ledger::ledger::StateCounts;
use crate::ledger::state::TaskState;

/// Dispatch totals for one executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub calls: u32,
    /// Attempts that ended `failed`, timeouts and cancellations included.
    pub errors: u32,
    /// Sum of the time attempts spent `in_progress`.
    pub busy: Duration,
}

/// Execution report for a run, folded from its ledger events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatistics {
    pub counts: StateCounts,
    /// Tasks dispatched more than once.
    pub retried: BTreeSet<TaskId>,
    pub executors: BTreeMap<ExecutorId, ExecutorStats>,
    pub substitutions: usize,
    pub gates_passed: usize,
    pub gates_failed: usize,
    /// Wall-clock time from the first to the last event.
    pub elapsed: Duration,
}

impl RunStatistics {
    pub fn from_events(events: &[LedgerEvent], counts: StateCounts) -> Self {
        let mut stats = RunStatistics {
            counts,
            ..RunStatistics::default()
        };
        let mut started: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut routed: HashMap<&str, &str> = HashMap::new();

        for event in events {
            match &event.kind {
                EventKind::TaskTransition { task_id, from, to, .. } => {
                    if *to == TaskState::InProgress {
                        started.insert(task_id, event.timestamp);
                        continue;
                    }
                    if *to == TaskState::Retrying {
                        stats.retried.insert(task_id.clone());
                    }
                    if *from != Some(TaskState::InProgress) {
                        continue;
                    }
                    let Some(executor) = routed.remove(task_id.as_str()) else {
                        continue;
                    };
                    let entry = stats.executors.entry(executor.to_string()).or_default();
                    if let Some(at) = started.remove(task_id.as_str()) {
                        entry.busy += elapsed_between(at, event.timestamp);
                    }
                    if *to == TaskState::Failed {
                        entry.errors += 1;
                    }
                }
                EventKind::TaskDispatched { task_id, executor, .. } => {
                    routed.insert(task_id, executor);
                    stats.executors.entry(executor.clone()).or_default().calls += 1;
                }
                EventKind::ExecutorSubstituted { .. } => stats.substitutions += 1,
                EventKind::GateChecked { passed: true, .. } => stats.gates_passed += 1,
                EventKind::GateChecked { passed: false, .. } => stats.gates_failed += 1,
                EventKind::BatchTransition { .. } | EventKind::RunFinished { .. } => {}
            }
        }

        if let (Some(first), Some(last)) = (events.first(), events.last()) {
            stats.elapsed = elapsed_between(first.timestamp, last.timestamp);
        }
        stats
    }
}

fn elapsed_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        writeln!(
            f,
            "tasks:    {} total, {} completed, {} failed, {} skipped, {} retried",
            c.total(),
            c.completed,
            c.failed,
            c.skipped,
            self.retried.len(),
        )?;
        if !self.retried.is_empty() {
            let retried: Vec<&str> = self.retried.iter().map(String::as_str).collect();
            writeln!(f, "retried:  {}", retried.join(", "))?;
        }
        for (name, e) in &self.executors {
            writeln!(
                f,
                "executor: {name}: {} calls, {} errors, {} busy",
                e.calls,
                e.errors,
                format_duration(e.busy)
            )?;
        }
        if self.substitutions > 0 {
            writeln!(f, "fallback: {} substitution(s)", self.substitutions)?;
        }
        if self.gates_passed + self.gates_failed > 0 {
            writeln!(
                f,
                "gates:    {} passed, {} failed",
                self.gates_passed, self.gates_failed
            )?;
        }
        write!(f, "elapsed:  {}", format_duration(self.elapsed))
    }
}
