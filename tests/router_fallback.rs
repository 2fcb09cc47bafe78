// tests/router_fallback.rs

mod common;
use crate::common::{init_tracing, router_with, with_timeout, GraphBuilder, ScriptedCapability};

use std::error::Error;
use std::sync::{Arc, Mutex};

use batchdag::engine::FailurePolicy;
use batchdag::ledger::{EventKind, RunStatus, TaskState};
use batchdag::types::FailureStrategy;
use batchdag::Orchestrator;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn unavailable_executor_is_substituted_and_recorded() -> TestResult {
    init_tracing();

    let log = Arc::new(Mutex::new(Vec::new()));
    let codex = ScriptedCapability::with_log("codex", Arc::clone(&log));
    let claude = ScriptedCapability::with_log("claude", Arc::clone(&log));
    codex.set_available(false);

    let router = router_with(&[codex.clone(), claude.clone()]).with_fallback("claude");
    let graph = GraphBuilder::new()
        .task("api", "codex", &[])
        .task("docs", "claude", &[])
        .build();

    let orch = Orchestrator::new(router)
        .with_policy(FailurePolicy::default().with_strategy(FailureStrategy::Skip));
    let report = with_timeout(orch.run(&graph)).await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(codex.dispatches().iter().all(|d| d.executor == "claude"));
    let api = claude
        .dispatches()
        .into_iter()
        .find(|d| d.task_id == "api")
        .expect("api dispatched through the fallback");
    assert_eq!(api.requested_executor, "codex");

    let substitutions: Vec<(String, String, String)> = orch
        .ledger()
        .events()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::ExecutorSubstituted {
                task_id,
                requested,
                fallback,
            } => Some((task_id, requested, fallback)),
            _ => None,
        })
        .collect();
    assert_eq!(
        substitutions,
        vec![("api".to_string(), "codex".to_string(), "claude".to_string())]
    );

    // One probe per capability for the whole run.
    assert_eq!(codex.probe_count(), 1);
    assert_eq!(claude.probe_count(), 1);

    // Statistics follow the executor that actually ran the task.
    let stats = &report.statistics;
    assert_eq!(stats.substitutions, 1);
    assert_eq!(stats.executors.keys().collect::<Vec<_>>(), vec!["claude"]);
    assert_eq!(stats.executors["claude"].calls, 2);
    assert_eq!(stats.executors["claude"].errors, 0);
    Ok(())
}

#[tokio::test]
async fn unresolvable_executor_goes_through_failure_policy() -> TestResult {
    let claude = ScriptedCapability::new("claude");
    let router = router_with(&[claude.clone()]);
    let graph = GraphBuilder::new()
        .task("orphan", "gemini", &[])
        .task("fine", "claude", &[])
        .build();

    let orch = Orchestrator::new(router).with_policy(FailurePolicy {
        strategy: FailureStrategy::Retry,
        max_retries: 1,
        retry_delay: std::time::Duration::from_millis(1),
        ..FailurePolicy::default()
    });
    let report = with_timeout(orch.run(&graph)).await?;

    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    let orphan = orch.ledger().entry("orphan").unwrap();
    assert_eq!(orphan.state, TaskState::Failed);
    assert_eq!(orphan.attempts, 2);
    assert!(orphan.error.unwrap().contains("gemini"));
    assert_eq!(orch.ledger().state_of("fine"), Some(TaskState::Completed));

    assert!(report.statistics.retried.contains("orphan"));
    assert!(!report.statistics.executors.contains_key("gemini"));
    assert_eq!(report.statistics.executors["claude"].calls, 1);
    Ok(())
}
