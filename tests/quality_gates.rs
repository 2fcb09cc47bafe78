// tests/quality_gates.rs
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, router_with, with_timeout, GraphBuilder, ScriptedCapability};

use std::error::Error;
use std::fs;
use std::path::Path;

use batchdag::checkpoint::CheckpointStore;
use batchdag::dag::TaskGraph;
use batchdag::engine::{FailurePolicy, GateCheck, QualityGates};
use batchdag::ledger::{BatchState, EventKind, RunStatus, TaskState};
use batchdag::types::{FailureStrategy, GateKind, GatePolicy};
use batchdag::Orchestrator;

type TestResult = Result<(), Box<dyn Error>>;

/// Three batches: `a` | `b1, b2` | `c`.
fn three_batch_graph() -> TaskGraph {
    GraphBuilder::new()
        .task("a", "x", &[])
        .task("b1", "x", &["a"])
        .task("b2", "x", &["a"])
        .task("c", "x", &["b1", "b2"])
        .build()
}

fn skip_policy() -> FailurePolicy {
    FailurePolicy::default().with_strategy(FailureStrategy::Skip)
}

/// Gate command that appends one line to `log` and passes.
fn logging_gate(kind: GateKind, log: &Path) -> GateCheck {
    GateCheck::new(kind, format!("echo {kind} >> '{}'", log.display()))
}

fn gate_batches(orch: &Orchestrator) -> Vec<(Option<usize>, GateKind, bool)> {
    orch.ledger()
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::GateChecked { gate, passed, .. } => Some((e.batch_index, gate, passed)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn per_batch_gates_run_at_every_barrier() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("gates.log");
    let gates = QualityGates::new(GatePolicy::PerBatch)
        .with_check(logging_gate(GateKind::Build, &log))
        .with_check(logging_gate(GateKind::Lint, &log));

    let cap = ScriptedCapability::new("x");
    let orch = Orchestrator::new(router_with(&[cap]))
        .with_policy(skip_policy())
        .with_gates(gates);
    let report = with_timeout(orch.run(&three_batch_graph())).await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.gates.len(), 6);
    assert!(report.gates.iter().all(|g| g.passed));
    assert_eq!(fs::read_to_string(&log)?.lines().count(), 6);

    let recorded = gate_batches(&orch);
    assert_eq!(
        recorded,
        vec![
            (Some(0), GateKind::Build, true),
            (Some(0), GateKind::Lint, true),
            (Some(1), GateKind::Build, true),
            (Some(1), GateKind::Lint, true),
            (Some(2), GateKind::Build, true),
            (Some(2), GateKind::Lint, true),
        ]
    );
    assert_eq!(report.statistics.gates_passed, 6);
    Ok(())
}

#[tokio::test]
async fn blocking_gate_failure_stops_before_the_next_batch() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path(), "gated");
    let graph = three_batch_graph();

    let failing = QualityGates::new(GatePolicy::PerBatch)
        .with_check(GateCheck::new(GateKind::Build, "echo broken build >&2; exit 1"))
        .with_check(GateCheck::new(GateKind::Test, "true"));
    let cap = ScriptedCapability::new("x");
    let first = Orchestrator::new(router_with(&[cap.clone()]))
        .with_policy(skip_policy())
        .with_gates(failing)
        .with_checkpoint_store(store.clone());
    let report = with_timeout(first.run(&graph)).await?;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(cap.dispatched_ids(), vec!["a"]);
    assert_eq!(report.gates.len(), 1);
    assert!(report.gates[0].blocks());
    assert_eq!(report.gates[0].detail.as_deref(), Some("exit code 1: broken build"));
    assert_eq!(first.ledger().batch_state(0), Some(BatchState::Completed));
    assert_eq!(first.ledger().state_of("b1"), Some(TaskState::Pending));

    let checkpoint = store.load()?.expect("checkpoint written");
    assert_eq!(checkpoint.status, Some(RunStatus::Aborted));
    assert_eq!(checkpoint.next_batch_index, 1);

    // Fixed build: the rest of the run goes through.
    let log = dir.path().join("gates.log");
    let cap2 = ScriptedCapability::new("x");
    let second = Orchestrator::new(router_with(&[cap2.clone()]))
        .with_policy(skip_policy())
        .with_gates(QualityGates::new(GatePolicy::PerBatch).with_check(logging_gate(GateKind::Build, &log)))
        .with_checkpoint_store(store.clone());
    let report = with_timeout(second.resume(checkpoint)).await?;

    assert_eq!(report.status, RunStatus::Completed);
    let mut dispatched = cap2.dispatched_ids();
    dispatched.sort();
    assert_eq!(dispatched, vec!["b1", "b2", "c"]);
    assert_eq!(fs::read_to_string(&log)?.lines().count(), 2);
    Ok(())
}

#[tokio::test]
async fn non_blocking_gate_failure_is_reported_only() -> TestResult {
    let gates = QualityGates::new(GatePolicy::OnComplete)
        .with_check(GateCheck::new(GateKind::Lint, "exit 4").blocking(false))
        .with_check(GateCheck::new(GateKind::Test, "true"));
    let cap = ScriptedCapability::new("x");
    let orch = Orchestrator::new(router_with(&[cap]))
        .with_policy(skip_policy())
        .with_gates(gates);
    let report = with_timeout(orch.run(&three_batch_graph())).await?;

    assert_eq!(report.status, RunStatus::Completed);
    let outcomes: Vec<(GateKind, bool)> = report.gates.iter().map(|g| (g.kind, g.passed)).collect();
    assert_eq!(outcomes, vec![(GateKind::Lint, false), (GateKind::Test, true)]);
    assert_eq!(
        gate_batches(&orch),
        vec![(None, GateKind::Lint, false), (None, GateKind::Test, true)]
    );
    assert_eq!(report.statistics.gates_failed, 1);
    Ok(())
}

#[tokio::test]
async fn failed_final_gate_leaves_a_resumable_checkpoint() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path(), "final");
    let graph = three_batch_graph();

    let cap = ScriptedCapability::new("x");
    let first = Orchestrator::new(router_with(&[cap]))
        .with_policy(skip_policy())
        .with_gates(QualityGates::new(GatePolicy::OnComplete).with_check(GateCheck::new(GateKind::Test, "exit 1")))
        .with_checkpoint_store(store.clone());
    let report = with_timeout(first.run(&graph)).await?;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.counts.completed, 4);
    let checkpoint = store.load()?.expect("checkpoint written");
    assert!(!checkpoint.is_finished());
    assert!(checkpoint.remaining.is_empty());

    // Resuming dispatches nothing and only repeats the gate round.
    let log = dir.path().join("gates.log");
    let cap2 = ScriptedCapability::new("x");
    let second = Orchestrator::new(router_with(&[cap2.clone()]))
        .with_policy(skip_policy())
        .with_gates(QualityGates::new(GatePolicy::OnComplete).with_check(logging_gate(GateKind::Test, &log)))
        .with_checkpoint_store(store.clone());
    let report = with_timeout(second.resume(checkpoint)).await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(cap2.dispatched_ids().is_empty());
    assert_eq!(fs::read_to_string(&log)?.lines().count(), 1);
    assert!(store.load()?.expect("final checkpoint").is_finished());
    Ok(())
}

#[tokio::test]
async fn manual_gates_never_run_during_a_run() -> TestResult {
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("gates.log");
    let cap = ScriptedCapability::new("x");
    let orch = Orchestrator::new(router_with(&[cap]))
        .with_policy(skip_policy())
        .with_gates(QualityGates::new(GatePolicy::Manual).with_check(logging_gate(GateKind::Build, &log)));
    let report = with_timeout(orch.run(&three_batch_graph())).await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.gates.is_empty());
    assert!(!log.exists());
    Ok(())
}
