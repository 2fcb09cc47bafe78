// src/checkpoint/model.rs

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{Batch, TaskGraph, TaskId, TaskSpec};
use crate::errors::Result;
use crate::ledger::{LedgerSnapshot, RunStatus, StateCounts};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Persisted state of a run at a batch boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub run_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Index of the first batch that did not complete.
    pub next_batch_index: usize,
    /// Set once the run has finished (in any way).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    pub ledger: LedgerSnapshot,
    /// Tasks still to run, with settled predecessors removed.
    pub remaining: Vec<TaskSpec>,
}

impl Checkpoint {
    /// Capture a checkpoint whose resume point is `batches[resume_from]`.
    ///
    /// Tasks of that batch and every later one are kept unless the ledger
    /// already has them `completed` or `skipped`.
    pub fn capture(
        run_name: &str,
        created_at: DateTime<Utc>,
        graph: &TaskGraph,
        batches: &[Batch],
        resume_from: usize,
        ledger: LedgerSnapshot,
        status: Option<RunStatus>,
    ) -> Self {
        let rest = batches.get(resume_from..).unwrap_or(&[]);
        let next_batch_index = rest
            .first()
            .map(|b| b.index)
            .or_else(|| batches.last().map(|b| b.index + 1))
            .unwrap_or(0);

        let keep: HashSet<&TaskId> = rest
            .iter()
            .flat_map(|b| b.tasks.iter())
            .filter(|id| {
                ledger
                    .entries
                    .get(id.as_str())
                    .is_none_or(|e| !e.state.is_settled())
            })
            .collect();

        let remaining = graph
            .tasks()
            .filter(|t| keep.contains(&t.id))
            .map(|t| {
                let mut spec = t.to_spec();
                spec.predecessors.retain(|p| keep.contains(p));
                spec
            })
            .collect();

        Self {
            version: CHECKPOINT_VERSION,
            run_name: run_name.to_string(),
            created_at,
            updated_at: Utc::now(),
            next_batch_index,
            status,
            ledger,
            remaining,
        }
    }

    /// Graph of the tasks still to run.
    pub fn remaining_graph(&self) -> Result<TaskGraph> {
        TaskGraph::from_specs(self.remaining.clone())
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            Some(RunStatus::Completed | RunStatus::PartiallyCompleted)
        )
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            run_name: self.run_name.clone(),
            updated_at: self.updated_at,
            next_batch_index: self.next_batch_index,
            status: self.status,
            counts: self.ledger.entries.values().map(|e| e.state).collect(),
            remaining: self.remaining.iter().map(|s| s.id.clone()).collect(),
        }
    }
}

/// Human-facing overview of a checkpoint, used by `--status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub run_name: String,
    pub updated_at: DateTime<Utc>,
    pub next_batch_index: usize,
    pub status: Option<RunStatus>,
    pub counts: StateCounts,
    pub remaining: Vec<TaskId>,
}

impl fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.map(RunStatus::as_str).unwrap_or("running");
        writeln!(f, "run:        {}", self.run_name)?;
        writeln!(f, "status:     {status}")?;
        writeln!(f, "updated:    {}", self.updated_at.to_rfc3339())?;
        writeln!(f, "next batch: {}", self.next_batch_index)?;
        writeln!(
            f,
            "tasks:      {} total, {} completed, {} failed, {} skipped, {} pending",
            self.counts.total(),
            self.counts.completed,
            self.counts.failed,
            self.counts.skipped,
            self.counts.pending + self.counts.retrying + self.counts.in_progress,
        )?;
        if self.remaining.is_empty() {
            write!(f, "remaining:  none")
        } else {
            write!(f, "remaining:  {}", self.remaining.join(", "))
        }
    }
}
