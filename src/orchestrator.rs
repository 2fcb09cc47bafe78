// src/orchestrator.rs

//! Library facade for one orchestration run.
//!
//! The orchestrator partitions the graph, seeds the ledger and hands the
//! batches to a [`BatchRunner`]. It also rebuilds a run from a
//! [`Checkpoint`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::ConfigFile;
use crate::dag::{Batch, Batcher, TaskGraph};
use crate::engine::{BatchRunner, Decider, FailurePolicy, QualityGates, RunReport, RunnerOptions};
use crate::errors::Result;
use crate::exec::{CancellationToken, ExecutorRouter};
use crate::ledger::{Ledger, LedgerEvent};
use crate::types::ExecutionMode;

pub struct Orchestrator {
    router: Arc<ExecutorRouter>,
    policy: FailurePolicy,
    options: RunnerOptions,
    mode: ExecutionMode,
    decider: Option<Arc<dyn Decider>>,
    checkpoints: Option<CheckpointStore>,
    gates: QualityGates,
    ledger: Ledger,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("router", &self.router)
            .field("policy", &self.policy)
            .field("mode", &self.mode)
            .field("checkpoints", &self.checkpoints)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator with default policy and limits and no checkpointing.
    pub fn new(router: ExecutorRouter) -> Self {
        Self {
            router: Arc::new(router),
            policy: FailurePolicy::default(),
            options: RunnerOptions::default(),
            mode: ExecutionMode::Parallel,
            decider: None,
            checkpoints: None,
            gates: QualityGates::default(),
            ledger: Ledger::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Policy, limits, mode, gates and checkpoint store taken from `cfg`.
    pub fn from_config(cfg: &ConfigFile, router: ExecutorRouter) -> Self {
        let mut orchestrator = Self::new(router)
            .with_policy(cfg.failure_policy())
            .with_options(cfg.runner_options())
            .with_mode(cfg.execution_mode())
            .with_gates(QualityGates::from_config(&cfg.gates));
        if cfg.checkpoint.enabled {
            orchestrator = orchestrator.with_checkpoint_store(CheckpointStore::from_config(&cfg.checkpoint));
        }
        orchestrator
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_gates(mut self, gates: QualityGates) -> Self {
        self.gates = gates;
        self
    }

    pub fn gates(&self) -> &QualityGates {
        &self.gates
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.ledger.subscribe()
    }

    /// Token that cancels the run when fired.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn router(&self) -> &ExecutorRouter {
        &self.router
    }

    /// Batches `graph` would run as, without touching the ledger.
    pub fn plan(&self, graph: &TaskGraph) -> Result<Vec<Batch>> {
        Batcher::new(self.mode).partition(graph)
    }

    /// Run `graph` from scratch.
    pub async fn run(&self, graph: &TaskGraph) -> Result<RunReport> {
        let runner = self.runner(Utc::now());
        runner.preflight()?;
        let batches = self.plan(graph)?;
        self.seed_ledger(&batches);
        runner.run_all(graph, &batches).await
    }

    /// Continue an interrupted run from its first incomplete batch.
    ///
    /// Completed and skipped tasks are never dispatched again; tasks left
    /// `failed` in the interrupted batch are retried.
    pub async fn resume(&self, checkpoint: Checkpoint) -> Result<RunReport> {
        let runner = self.runner(checkpoint.created_at);
        runner.preflight()?;
        let graph = checkpoint.remaining_graph()?;
        let batches = Batcher::new(self.mode)
            .starting_at(checkpoint.next_batch_index)
            .partition(&graph)?;

        info!(
            run = %checkpoint.run_name,
            next_batch = checkpoint.next_batch_index,
            remaining = graph.len(),
            "resuming from checkpoint"
        );

        self.ledger.restore(checkpoint.ledger);
        self.seed_ledger(&batches);
        runner.run_all(&graph, &batches).await
    }

    fn seed_ledger(&self, batches: &[Batch]) {
        for batch in batches {
            for id in &batch.tasks {
                self.ledger.register_pending(id, Some(batch.index));
            }
        }
    }

    fn runner(&self, created_at: chrono::DateTime<Utc>) -> BatchRunner {
        let mut runner = BatchRunner::new(
            Arc::clone(&self.router),
            self.ledger.clone(),
            self.policy,
            self.options.clone(),
        )
        .with_cancellation(self.cancel.clone())
        .with_gates(self.gates.clone());
        if let Some(decider) = &self.decider {
            runner = runner.with_decider(Arc::clone(decider));
        }
        if let Some(store) = &self.checkpoints {
            runner = runner.with_checkpoint_store(store.clone(), created_at);
        }
        runner
    }
}
