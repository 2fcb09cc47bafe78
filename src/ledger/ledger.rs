// src/ledger/ledger.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::dag::TaskId;
use crate::errors::{BatchdagError, Result};
use crate::ledger::event::{EventKind, LedgerEvent};
use crate::ledger::state::{BatchState, RunStatus, TaskState};
use crate::ledger::stats::RunStatistics;
use crate::types::GateKind;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Current record for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub task_id: TaskId,
    pub state: TaskState,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of times the task entered `in_progress`.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
}

/// Serializable copy of the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub entries: BTreeMap<TaskId, LedgerEntry>,
    pub batches: BTreeMap<usize, BatchState>,
    pub events: Vec<LedgerEvent>,
}

/// Number of entries per task state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub skipped: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed + self.retrying + self.skipped
    }

    fn bump(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::InProgress => self.in_progress += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Retrying => self.retrying += 1,
            TaskState::Skipped => self.skipped += 1,
        }
    }
}

impl FromIterator<TaskState> for StateCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = StateCounts::default();
        for state in iter {
            counts.bump(state);
        }
        counts
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<TaskId, LedgerEntry>,
    batches: BTreeMap<usize, BatchState>,
    events: Vec<LedgerEvent>,
    next_seq: u64,
}

impl Inner {
    fn append(&mut self, batch_index: Option<usize>, kind: EventKind) -> LedgerEvent {
        let event = LedgerEvent {
            seq: self.next_seq,
            batch_index,
            timestamp: Utc::now(),
            kind,
        };
        self.next_seq += 1;
        self.events.push(event.clone());
        event
    }
}

/// Append-only record of task and batch transitions.
///
/// Cloning is cheap and every clone writes to the same ledger. Writes are
/// serialized under one mutex and published to subscribers in write order.
/// Every task write is checked against the [`TaskState`] lattice; an illegal
/// write is rejected and leaves the ledger untouched.
#[derive(Debug, Clone)]
pub struct Ledger {
    inner: Arc<Mutex<Inner>>,
    events_tx: broadcast::Sender<LedgerEvent>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events_tx,
        }
    }

    /// Rebuild a ledger from a checkpointed snapshot. Sequence numbers
    /// continue after the last restored event.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let ledger = Self::new();
        ledger.restore(snapshot);
        ledger
    }

    /// Replace the contents of this ledger with `snapshot`. Existing
    /// subscribers stay attached; restored events are not re-published.
    pub fn restore(&self, snapshot: LedgerSnapshot) {
        let next_seq = snapshot.events.last().map(|e| e.seq + 1).unwrap_or(0);
        let mut inner = self.lock();
        inner.entries = snapshot.entries;
        inner.batches = snapshot.batches;
        inner.events = snapshot.events;
        inner.next_seq = next_seq;
    }

    /// Receive every event written after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: LedgerEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Create a `pending` entry. Returns `false` if the task already has an
    /// entry (for instance one restored from a checkpoint).
    pub fn register_pending(&self, task_id: &str, batch_index: Option<usize>) -> bool {
        let mut inner = self.lock();
        if inner.entries.contains_key(task_id) {
            return false;
        }

        inner.entries.insert(
            task_id.to_string(),
            LedgerEntry {
                task_id: task_id.to_string(),
                state: TaskState::Pending,
                updated_at: Utc::now(),
                error: None,
                attempts: 0,
                batch_index,
            },
        );
        let event = inner.append(
            batch_index,
            EventKind::TaskTransition {
                task_id: task_id.to_string(),
                from: None,
                to: TaskState::Pending,
                detail: None,
            },
        );
        self.publish(event);
        true
    }

    /// Move a task to `to`, recording `detail` as its error for `failed` and
    /// `skipped`.
    pub fn transition(
        &self,
        task_id: &str,
        to: TaskState,
        detail: Option<String>,
        batch_index: Option<usize>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .get_mut(task_id)
            .ok_or_else(|| BatchdagError::TaskNotFound(task_id.to_string()))?;

        let from = entry.state;
        if !from.can_transition_to(to) {
            return Err(BatchdagError::IllegalTransition {
                task: task_id.to_string(),
                from,
                to,
            });
        }

        entry.state = to;
        entry.updated_at = Utc::now();
        if batch_index.is_some() {
            entry.batch_index = batch_index;
        }
        match to {
            TaskState::InProgress => entry.attempts += 1,
            TaskState::Completed => entry.error = None,
            TaskState::Failed => entry.error = detail.clone(),
            TaskState::Skipped => {
                if detail.is_some() {
                    entry.error = detail.clone();
                }
            }
            TaskState::Pending | TaskState::Retrying => {}
        }

        trace!(task = %task_id, %from, %to, "ledger transition");
        let event = inner.append(
            batch_index,
            EventKind::TaskTransition {
                task_id: task_id.to_string(),
                from: Some(from),
                to,
                detail,
            },
        );
        self.publish(event);
        Ok(())
    }

    /// Move a batch to `to`. At most one batch may be `in_progress`.
    pub fn transition_batch(&self, index: usize, to: BatchState) -> Result<()> {
        let mut inner = self.lock();
        let from = inner
            .batches
            .get(&index)
            .copied()
            .unwrap_or(BatchState::Pending);

        let other_active = to == BatchState::InProgress
            && inner
                .batches
                .iter()
                .any(|(i, s)| *i != index && *s == BatchState::InProgress);

        if !from.can_transition_to(to) || other_active {
            return Err(BatchdagError::IllegalBatchTransition {
                batch: index,
                from,
                to,
            });
        }

        inner.batches.insert(index, to);
        debug!(batch = index, %from, %to, "batch transition");
        let event = inner.append(Some(index), EventKind::BatchTransition { from, to });
        self.publish(event);
        Ok(())
    }

    pub fn record_substitution(
        &self,
        task_id: &str,
        requested: &str,
        fallback: &str,
        batch_index: Option<usize>,
    ) {
        let mut inner = self.lock();
        let event = inner.append(
            batch_index,
            EventKind::ExecutorSubstituted {
                task_id: task_id.to_string(),
                requested: requested.to_string(),
                fallback: fallback.to_string(),
            },
        );
        self.publish(event);
    }

    pub fn record_dispatch(
        &self,
        task_id: &str,
        executor: &str,
        attempt: u32,
        batch_index: Option<usize>,
    ) {
        let mut inner = self.lock();
        let event = inner.append(
            batch_index,
            EventKind::TaskDispatched {
                task_id: task_id.to_string(),
                executor: executor.to_string(),
                attempt,
            },
        );
        self.publish(event);
    }

    pub fn record_gate(
        &self,
        gate: GateKind,
        passed: bool,
        blocking: bool,
        detail: Option<String>,
        batch_index: Option<usize>,
    ) {
        let mut inner = self.lock();
        let event = inner.append(
            batch_index,
            EventKind::GateChecked {
                gate,
                passed,
                blocking,
                detail,
            },
        );
        self.publish(event);
    }

    pub fn record_run_finished(&self, status: RunStatus) {
        let mut inner = self.lock();
        let event = inner.append(None, EventKind::RunFinished { status });
        self.publish(event);
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.lock().entries.get(task_id).map(|e| e.state)
    }

    pub fn entry(&self, task_id: &str) -> Option<LedgerEntry> {
        self.lock().entries.get(task_id).cloned()
    }

    pub fn batch_state(&self, index: usize) -> Option<BatchState> {
        self.lock().batches.get(&index).copied()
    }

    /// Number of times `task_id` was dispatched.
    pub fn dispatch_count(&self, task_id: &str) -> u32 {
        self.lock()
            .entries
            .get(task_id)
            .map(|e| e.attempts)
            .unwrap_or(0)
    }

    pub fn counts(&self) -> StateCounts {
        self.lock().entries.values().map(|e| e.state).collect()
    }

    /// Totals derived from everything recorded so far, restored events
    /// included.
    pub fn statistics(&self) -> RunStatistics {
        let inner = self.lock();
        let counts = inner.entries.values().map(|e| e.state).collect();
        RunStatistics::from_events(&inner.events, counts)
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.lock().events.clone()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.lock();
        LedgerSnapshot {
            entries: inner.entries.clone(),
            batches: inner.batches.clone(),
            events: inner.events.clone(),
        }
    }
}
