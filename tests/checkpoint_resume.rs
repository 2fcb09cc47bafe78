// tests/checkpoint_resume.rs

mod common;
use crate::common::{init_tracing, router_with, with_timeout, GraphBuilder, ScriptedCapability, Step};

use std::error::Error;
use std::time::Duration;

use batchdag::checkpoint::CheckpointStore;
use batchdag::dag::TaskGraph;
use batchdag::engine::FailurePolicy;
use batchdag::ledger::{BatchState, RunStatus, TaskState};
use batchdag::types::FailureStrategy;
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

#[tokio::test]
async fn resume_after_first_batch_runs_only_the_rest() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path(), "scenario");
    let graph = three_batch_graph();

    // First process: cancelled while batch 1 is in flight.
    let cap = ScriptedCapability::new("x");
    cap.script("b1", vec![Step::Hang]);
    cap.script("b2", vec![Step::Hang]);
    let first = Orchestrator::new(router_with(&[cap.clone()]))
        .with_policy(skip_policy())
        .with_checkpoint_store(store.clone());

    let cancel = first.cancellation_token();
    let mut events = first.subscribe();
    tokio::spawn(async move {
        let mut started = 0;
        while let Ok(event) = events.recv().await {
            if event.is_dispatch_of("b1") || event.is_dispatch_of("b2") {
                started += 1;
            }
            if started == 2 {
                cancel.cancel();
                break;
            }
        }
    });

    let report = with_timeout(first.run(&graph)).await?;
    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(first.ledger().state_of("a"), Some(TaskState::Completed));
    assert_eq!(first.ledger().batch_state(1), Some(BatchState::Cancelled));
    let b1 = first.ledger().entry("b1").unwrap();
    assert_eq!(b1.state, TaskState::Failed);
    assert_eq!(b1.error.as_deref(), Some("cancelled"));

    let checkpoint = store.load()?.expect("checkpoint written");
    assert_eq!(checkpoint.status, Some(RunStatus::Cancelled));
    assert_eq!(checkpoint.next_batch_index, 1);
    let mut remaining: Vec<&str> = checkpoint.remaining.iter().map(|s| s.id.as_str()).collect();
    remaining.sort();
    assert_eq!(remaining, vec!["b1", "b2", "c"]);

    // Second process: fresh capability, same store.
    let cap2 = ScriptedCapability::new("x");
    let second = Orchestrator::new(router_with(&[cap2.clone()]))
        .with_policy(skip_policy())
        .with_checkpoint_store(store.clone());
    let report = with_timeout(second.resume(checkpoint)).await?;

    assert_eq!(report.status, RunStatus::Completed);
    let mut dispatched = cap2.dispatched_ids();
    dispatched.sort();
    assert_eq!(dispatched, vec!["b1", "b2", "c"]);
    assert!(cap2.dispatches().iter().all(|d| d.batch_index >= 1));

    let ledger = second.ledger();
    assert_eq!(ledger.state_of("a"), Some(TaskState::Completed));
    assert_eq!(ledger.dispatch_count("a"), 1);
    assert_eq!(ledger.dispatch_count("b1"), 2);
    assert_eq!(ledger.batch_state(1), Some(BatchState::Completed));
    assert_eq!(ledger.batch_state(2), Some(BatchState::Completed));

    let finished = store.load()?.expect("final checkpoint");
    assert!(finished.is_finished());
    assert!(finished.remaining.is_empty());
    Ok(())
}

#[tokio::test]
async fn checkpoint_after_each_completed_batch() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path(), "boundaries");
    let graph = three_batch_graph();

    let cap = ScriptedCapability::with_delay("x", Duration::from_millis(30));
    let orch = Orchestrator::new(router_with(&[cap]))
        .with_policy(skip_policy())
        .with_checkpoint_store(store.clone());

    // Observe the checkpoint as soon as batch 1 starts: batch 0 is done.
    let watcher_store = store.clone();
    let mut events = orch.subscribe();
    let observed = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.is_dispatch_of("b1") {
                return watcher_store.load().ok().flatten();
            }
        }
        None
    });

    let report = with_timeout(orch.run(&graph)).await?;
    assert_eq!(report.status, RunStatus::Completed);

    let mid = observed.await?.expect("checkpoint present after batch 0");
    assert_eq!(mid.next_batch_index, 1);
    assert_eq!(mid.status, None);
    assert_eq!(
        mid.ledger.entries.get("a").map(|e| e.state),
        Some(TaskState::Completed)
    );
    // `a` is settled, so b1 and b2 no longer list it.
    assert!(mid.remaining.iter().all(|s| s.id != "a"));
    assert!(
        mid.remaining
            .iter()
            .filter(|s| s.id.starts_with('b'))
            .all(|s| s.predecessors.is_empty())
    );
    Ok(())
}

#[tokio::test]
async fn aborted_run_resumes_from_the_failing_batch() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = CheckpointStore::new(dir.path(), "abort");
    let graph = three_batch_graph();

    let cap = ScriptedCapability::new("x");
    cap.script("b2", vec![Step::fail("flaky")]);
    let first = Orchestrator::new(router_with(&[cap.clone()]))
        .with_policy(FailurePolicy::default().with_strategy(FailureStrategy::FailFast))
        .with_checkpoint_store(store.clone());
    let report = with_timeout(first.run(&graph)).await?;
    assert_eq!(report.status, RunStatus::Aborted);

    let checkpoint = store.load()?.expect("checkpoint");
    assert_eq!(checkpoint.next_batch_index, 1);
    let summary = checkpoint.summary();
    assert_eq!(summary.counts.completed, 2);
    assert_eq!(summary.counts.failed, 1);
    assert!(summary.to_string().contains("aborted"));

    let cap2 = ScriptedCapability::new("x");
    let second = Orchestrator::new(router_with(&[cap2.clone()]))
        .with_policy(FailurePolicy::default().with_strategy(FailureStrategy::FailFast))
        .with_checkpoint_store(store.clone());
    let report = with_timeout(second.resume(checkpoint)).await?;

    assert_eq!(report.status, RunStatus::Completed);
    // b1 already completed in the aborted batch and is not dispatched again.
    let mut dispatched = cap2.dispatched_ids();
    dispatched.sort();
    assert_eq!(dispatched, vec!["b2", "c"]);
    Ok(())
}
