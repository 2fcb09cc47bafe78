// src/engine/runner.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::dag::{Batch, Task, TaskGraph, TaskId};
use crate::engine::decider::{Decider, DecisionRequest};
use crate::engine::gates::{GatePoint, GateResult, QualityGates};
use crate::engine::policy::{FailurePolicy, PolicyAction};
use crate::errors::{BatchdagError, Result};
use crate::exec::{CancellationToken, ExecutionOutcome, ExecutorRouter, TaskDescription};
use crate::ledger::{BatchState, Ledger, RunStatistics, RunStatus, StateCounts, TaskState};
use crate::types::FailureStrategy;

/// Limits applied while running batches.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOptions {
    /// Run-wide bound on concurrently dispatched tasks.
    pub max_parallel_tasks: usize,
    /// Timeout for tasks without an estimate or executor override.
    pub default_task_timeout: Duration,
    /// Upper bound on one batch barrier.
    pub batch_timeout: Duration,
    /// Multiplier applied to a task's estimated duration.
    pub timeout_grace: f64,
    /// Per-executor timeouts for tasks without an estimate.
    pub executor_timeouts: HashMap<String, Duration>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 5,
            default_task_timeout: Duration::from_secs(10 * 60),
            batch_timeout: Duration::from_secs(30 * 60),
            timeout_grace: 1.5,
            executor_timeouts: HashMap::new(),
        }
    }
}

impl RunnerOptions {
    /// Timeout for one dispatch of `task`.
    ///
    /// A non-zero estimate wins, scaled by `timeout_grace`; then the
    /// executor override; then the default. A scaled estimate too large to
    /// represent saturates to `Duration::MAX`.
    pub fn task_timeout(&self, task: &Task) -> Duration {
        if let Some(estimate) = task.estimated_duration.filter(|d| !d.is_zero()) {
            let scaled = estimate.as_secs_f64() * self.timeout_grace.max(1.0);
            return Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX);
        }
        self.executor_timeouts
            .get(&task.executor)
            .copied()
            .unwrap_or(self.default_task_timeout)
    }
}

/// Final state of one task as seen at the end of its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub state: TaskState,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub index: usize,
    pub state: BatchState,
    pub timed_out: bool,
    pub tasks: Vec<TaskReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub batches: Vec<BatchReport>,
    pub counts: StateCounts,
    /// Gate results of this process, in the order they ran.
    pub gates: Vec<GateResult>,
    pub statistics: RunStatistics,
}

impl RunReport {
    pub fn task(&self, id: &str) -> Option<&TaskReport> {
        self.batches
            .iter()
            .flat_map(|b| b.tasks.iter())
            .find(|t| t.task_id == id)
    }
}

/// Checkpoint destination plus the creation time carried across saves.
#[derive(Debug, Clone)]
struct CheckpointTarget {
    store: CheckpointStore,
    created_at: DateTime<Utc>,
}

/// State shared by every dispatch of a run.
struct Shared {
    router: Arc<ExecutorRouter>,
    ledger: Ledger,
    policy: FailurePolicy,
    options: RunnerOptions,
    decider: Option<Arc<dyn Decider>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

/// Tokens a dispatch watches.
#[derive(Clone)]
struct TaskSignals {
    /// No new dispatch once this fires; in-flight work continues.
    halt: CancellationToken,
    /// Cancels in-flight work of the current batch.
    batch: CancellationToken,
}

/// Runs batches strictly in order, dispatching the tasks of one batch
/// concurrently under a run-wide concurrency bound.
///
/// Every state change goes through the [`Ledger`]; on failure the
/// [`FailurePolicy`] decides what happens next. A checkpoint is saved after
/// each batch barrier when a store is configured, and [`QualityGates`] run
/// where their policy places them.
pub struct BatchRunner {
    router: Arc<ExecutorRouter>,
    ledger: Ledger,
    policy: FailurePolicy,
    options: RunnerOptions,
    decider: Option<Arc<dyn Decider>>,
    cancel: CancellationToken,
    checkpoint: Option<CheckpointTarget>,
    gates: QualityGates,
}

impl fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunner")
            .field("router", &self.router)
            .field("policy", &self.policy)
            .field("options", &self.options)
            .field("checkpoint", &self.checkpoint)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    pub fn new(
        router: Arc<ExecutorRouter>,
        ledger: Ledger,
        policy: FailurePolicy,
        options: RunnerOptions,
    ) -> Self {
        Self {
            router,
            ledger,
            policy,
            options,
            decider: None,
            cancel: CancellationToken::new(),
            checkpoint: None,
            gates: QualityGates::default(),
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Use `cancel` as the run-wide cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_checkpoint_store(mut self, store: CheckpointStore, created_at: DateTime<Utc>) -> Self {
        self.checkpoint = Some(CheckpointTarget { store, created_at });
        self
    }

    pub fn with_gates(mut self, gates: QualityGates) -> Self {
        self.gates = gates;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Configuration checks that must pass before the ledger is touched.
    pub fn preflight(&self) -> Result<()> {
        if self.policy.strategy == FailureStrategy::Ask && self.decider.is_none() {
            return Err(BatchdagError::ConfigError(
                "failure strategy 'ask' requires a decision provider".to_string(),
            ));
        }
        Ok(())
    }

    /// Run `batches` of `graph` in order. Every task of every batch must
    /// already have a ledger entry.
    pub async fn run_all(&self, graph: &TaskGraph, batches: &[Batch]) -> Result<RunReport> {
        self.preflight()?;

        let shared = Arc::new(Shared {
            router: Arc::clone(&self.router),
            ledger: self.ledger.clone(),
            policy: self.policy,
            options: self.options.clone(),
            decider: self.decider.clone(),
            permits: Arc::new(Semaphore::new(self.options.max_parallel_tasks.max(1))),
            cancel: self.cancel.clone(),
        });

        let halt = CancellationToken::new();
        let mut reports = Vec::with_capacity(batches.len());
        let mut gate_results = Vec::new();
        let mut stopped: Option<RunStatus> = None;
        let mut resume_from = batches.len();

        info!(
            batches = batches.len(),
            tasks = graph.len(),
            strategy = %self.policy.strategy,
            max_parallel = self.options.max_parallel_tasks,
            "run started"
        );

        for (pos, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                stopped = Some(RunStatus::Cancelled);
                resume_from = pos;
                break;
            }

            self.ledger.transition_batch(batch.index, BatchState::InProgress)?;
            let mut report = self.run_batch(&shared, graph, batch, &halt).await?;

            let state = if self.cancel.is_cancelled() {
                BatchState::Cancelled
            } else if halt.is_cancelled() {
                BatchState::Aborted
            } else {
                BatchState::Completed
            };
            self.ledger.transition_batch(batch.index, state)?;
            report.state = state;
            info!(batch = batch.index, %state, "batch finished");
            reports.push(report);

            match state {
                BatchState::Completed => {
                    self.save_checkpoint(graph, batches, pos + 1, None);
                    let point = GatePoint::BatchBarrier(batch.index);
                    if let Some(status) = self.run_gates(point, &mut gate_results).await {
                        stopped = Some(status);
                        resume_from = pos + 1;
                        break;
                    }
                }
                BatchState::Cancelled => {
                    stopped = Some(RunStatus::Cancelled);
                    resume_from = pos;
                    break;
                }
                _ => {
                    stopped = Some(RunStatus::Aborted);
                    resume_from = pos;
                    break;
                }
            }
        }

        if stopped.is_none() && !self.cancel.is_cancelled() {
            stopped = self.run_gates(GatePoint::RunComplete, &mut gate_results).await;
        }

        let counts = self.ledger.counts();
        let status = stopped.unwrap_or(if counts.completed == counts.total() {
            RunStatus::Completed
        } else {
            RunStatus::PartiallyCompleted
        });

        self.ledger.record_run_finished(status);
        self.save_checkpoint(graph, batches, resume_from, Some(status));
        info!(
            %status,
            completed = counts.completed,
            failed = counts.failed,
            skipped = counts.skipped,
            pending = counts.pending,
            "run finished"
        );

        Ok(RunReport {
            status,
            batches: reports,
            counts,
            gates: gate_results,
            statistics: self.ledger.statistics(),
        })
    }

    /// Run the gate round due at `point`, if any, and record each result.
    /// Returns the status the run stops with, or `None` to carry on.
    async fn run_gates(&self, point: GatePoint, results: &mut Vec<GateResult>) -> Option<RunStatus> {
        if !self.gates.applies_at(point) {
            return None;
        }
        let batch_index = match point {
            GatePoint::BatchBarrier(index) => Some(index),
            GatePoint::RunComplete => None,
        };
        info!(?point, gates = self.gates.checks().len(), "running quality gates");

        let round = self.gates.run(&self.cancel).await;
        for r in &round {
            self.ledger
                .record_gate(r.kind, r.passed, r.blocking, r.detail.clone(), batch_index);
        }
        let blocked = round.iter().find(|r| r.blocks()).map(|r| r.kind);
        results.extend(round);

        if self.cancel.is_cancelled() {
            return Some(RunStatus::Cancelled);
        }
        if let Some(gate) = blocked {
            warn!(?point, %gate, "blocking quality gate failed; stopping the run");
            return Some(RunStatus::Aborted);
        }
        None
    }

    async fn run_batch(
        &self,
        shared: &Arc<Shared>,
        graph: &TaskGraph,
        batch: &Batch,
        halt: &CancellationToken,
    ) -> Result<BatchReport> {
        let signals = TaskSignals {
            halt: halt.clone(),
            batch: self.cancel.child_token(),
        };

        debug!(batch = batch.index, tasks = ?batch.tasks, "dispatching batch");
        let mut set = JoinSet::new();
        for id in &batch.tasks {
            let task = graph
                .get(id)
                .cloned()
                .ok_or_else(|| BatchdagError::TaskNotFound(id.clone()))?;
            set.spawn(run_task(
                Arc::clone(shared),
                task,
                batch.index,
                signals.clone(),
            ));
        }

        let deadline = tokio::time::sleep(self.options.batch_timeout);
        tokio::pin!(deadline);
        let mut timed_out = false;
        let mut first_error: Option<BatchdagError> = None;

        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        error!(batch = batch.index, error = %e, "task dispatch failed");
                        signals.batch.cancel();
                        first_error.get_or_insert(e);
                    }
                    Some(Err(join_err)) => {
                        error!(batch = batch.index, error = %join_err, "task dispatch panicked");
                        signals.batch.cancel();
                        first_error.get_or_insert(BatchdagError::Other(anyhow::anyhow!(
                            "task dispatch panicked: {join_err}"
                        )));
                    }
                },
                _ = &mut deadline, if !timed_out => {
                    warn!(
                        batch = batch.index,
                        timeout_secs = self.options.batch_timeout.as_secs(),
                        "batch timed out; cancelling in-flight tasks"
                    );
                    timed_out = true;
                    signals.batch.cancel();
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let tasks = batch
            .tasks
            .iter()
            .filter_map(|id| self.ledger.entry(id))
            .map(|e| TaskReport {
                task_id: e.task_id,
                state: e.state,
                attempts: e.attempts,
                error: e.error,
            })
            .collect();

        Ok(BatchReport {
            index: batch.index,
            state: BatchState::InProgress,
            timed_out,
            tasks,
        })
    }

    fn save_checkpoint(
        &self,
        graph: &TaskGraph,
        batches: &[Batch],
        resume_from: usize,
        status: Option<RunStatus>,
    ) {
        let Some(target) = &self.checkpoint else {
            return;
        };
        let checkpoint = Checkpoint::capture(
            target.store.run_name(),
            target.created_at,
            graph,
            batches,
            resume_from,
            self.ledger.snapshot(),
            status,
        );
        if let Err(e) = target.store.save(&checkpoint) {
            error!(
                path = %target.store.path().display(),
                error = %e,
                "failed to save checkpoint"
            );
        }
    }
}

/// Drive one task to a terminal state (or leave it untouched if the run
/// stops before it gets a slot).
async fn run_task(
    shared: Arc<Shared>,
    task: Task,
    batch_index: usize,
    signals: TaskSignals,
) -> Result<()> {
    let ledger = &shared.ledger;
    let at = Some(batch_index);
    let mut attempt = 0u32;
    let mut delay: Option<Duration> = None;

    loop {
        if let Some(d) = delay.take() {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return Ok(()),
                _ = signals.halt.cancelled() => {
                    debug!(task = %task.id, "run halted; dropping pending retry");
                    return Ok(());
                }
                _ = tokio::time::sleep(d) => {}
            }
        }

        let permit = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Ok(()),
            _ = signals.halt.cancelled() => return Ok(()),
            permit = Arc::clone(&shared.permits).acquire_owned() => permit.map_err(|e| {
                BatchdagError::Other(anyhow::anyhow!("concurrency limiter closed: {e}"))
            })?,
        };

        attempt += 1;
        if ledger.state_of(&task.id) == Some(TaskState::Failed) {
            ledger.transition(&task.id, TaskState::Retrying, None, at)?;
        }
        ledger.transition(&task.id, TaskState::InProgress, None, at)?;

        let outcome = dispatch(&shared, &task, attempt, batch_index, &signals).await;

        if outcome.is_success() {
            ledger.transition(&task.id, TaskState::Completed, None, at)?;
            drop(permit);
            info!(task = %task.id, attempt, "task completed");
            return Ok(());
        }

        ledger.transition(&task.id, TaskState::Failed, outcome.detail.clone(), at)?;
        warn!(
            task = %task.id,
            attempt,
            error = outcome.detail.as_deref().unwrap_or(""),
            "task failed"
        );

        if signals.batch.is_cancelled() {
            // Run cancellation or batch timeout: the failure is final for
            // this run. A batch timeout still aborts under fail_fast.
            if !shared.cancel.is_cancelled() && shared.policy.strategy == FailureStrategy::FailFast {
                signals.halt.cancel();
            }
            return Ok(());
        }
        if signals.halt.is_cancelled() {
            return Ok(());
        }

        // Abort must be signalled while the slot is still held.
        let mut action = shared.policy.decide(attempt);
        if action == PolicyAction::Abort {
            signals.halt.cancel();
        }
        drop(permit);

        if action == PolicyAction::Ask {
            let Some(decider) = shared.decider.as_ref() else {
                return Ok(());
            };
            let request = DecisionRequest {
                task_id: task.id.clone(),
                label: task.display_label().to_string(),
                executor: task.executor.clone(),
                batch_index,
                attempt,
                error: outcome.detail.clone(),
            };
            let decision = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return Ok(()),
                d = decider.decide(request) => d,
            };
            info!(task = %task.id, %decision, "decision received");
            if signals.halt.is_cancelled() {
                return Ok(());
            }
            action = shared.policy.resolve_decision(decision, attempt);
        }

        match action {
            PolicyAction::Retry { delay: d } => {
                debug!(task = %task.id, attempt, delay_ms = d.as_millis() as u64, "scheduling retry");
                delay = Some(d);
            }
            PolicyAction::Skip => {
                ledger.transition(&task.id, TaskState::Skipped, outcome.detail, at)?;
                info!(task = %task.id, "task skipped");
                return Ok(());
            }
            PolicyAction::Fail => {
                info!(task = %task.id, attempts = attempt, "retries exhausted; task failed");
                return Ok(());
            }
            PolicyAction::Abort | PolicyAction::Ask => {
                warn!(task = %task.id, "aborting run; no new tasks will be dispatched");
                signals.halt.cancel();
                return Ok(());
            }
        }
    }
}

/// Resolve the executor and run one attempt under its timeout.
async fn dispatch(
    shared: &Shared,
    task: &Task,
    attempt: u32,
    batch_index: usize,
    signals: &TaskSignals,
) -> ExecutionOutcome {
    let cancelled_detail = || {
        if shared.cancel.is_cancelled() {
            ExecutionOutcome::failed("cancelled")
        } else {
            ExecutionOutcome::failed("batch timed out")
        }
    };
    if signals.batch.is_cancelled() {
        return cancelled_detail();
    }

    let resolution = match shared.router.resolve(&task.executor).await {
        Ok(r) => r,
        Err(e) => return ExecutionOutcome::failed(e.to_string()),
    };
    if let Some(requested) = &resolution.substituted_for {
        shared
            .ledger
            .record_substitution(&task.id, requested, &resolution.executor, Some(batch_index));
    }
    shared
        .ledger
        .record_dispatch(&task.id, &resolution.executor, attempt, Some(batch_index));

    let timeout = shared.options.task_timeout(task);
    let description = TaskDescription {
        id: task.id.clone(),
        label: task.display_label().to_string(),
        executor: resolution.executor.clone(),
        requested_executor: task.executor.clone(),
        output_ref: task.output_ref.clone(),
        attempt,
        batch_index,
    };
    debug!(
        task = %task.id,
        executor = %resolution.executor,
        attempt,
        timeout_secs = timeout.as_secs_f64(),
        "dispatching task"
    );

    let token = signals.batch.child_token();
    let execution = resolution.capability.execute(description, token.clone());

    tokio::select! {
        biased;
        _ = signals.batch.cancelled() => cancelled_detail(),
        res = tokio::time::timeout(timeout, execution) => match res {
            Ok(_) if signals.batch.is_cancelled() => cancelled_detail(),
            Ok(outcome) => outcome,
            Err(_) => {
                token.cancel();
                ExecutionOutcome::failed(format!(
                    "timed out after {}s",
                    timeout.as_secs_f64()
                ))
            }
        },
    }
}
