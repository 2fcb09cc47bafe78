// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod types;

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;
use crate::cli::CliArgs;
use crate::config::{load_or_default, ConfigFile};
use crate::dag::{load_graph, TaskGraph};
use crate::engine::{QualityGates, RunReport, StdinDecider};
use crate::exec::{CancellationToken, ExecutorRouter};
use crate::ledger::RunStatus;
use crate::types::FailureStrategy;

pub use crate::orchestrator::Orchestrator;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (plus CLI overrides)
/// - graph ingestion or checkpoint loading
/// - executor router and decision provider
/// - Ctrl-C handling
///
/// Any final status other than `completed` is returned as an error.
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_or_default(&args.config)?;
    if args.strict_order {
        cfg.execution.strict_order = true;
    }
    if let Some(name) = &args.run_name {
        cfg.checkpoint.run_name = name.clone();
    }
    let store = CheckpointStore::from_config(&cfg.checkpoint);

    if args.status {
        if args.run_name.is_some() {
            match store.load()? {
                Some(checkpoint) => println!("{}", checkpoint.summary()),
                None => println!("no checkpoint for run '{}'", store.run_name()),
            }
        } else {
            print_status(&cfg.checkpoint.dir)?;
        }
        return Ok(());
    }

    if args.run_gates {
        return run_gates_once(&QualityGates::from_config(&cfg.gates)).await;
    }

    let router = ExecutorRouter::from_config(&cfg);
    let mut orchestrator = Orchestrator::from_config(&cfg, router);
    if cfg.execution.failure_strategy == FailureStrategy::Ask {
        orchestrator = orchestrator.with_decider(Arc::new(StdinDecider::new()));
    }

    // Ctrl-C → cancel the run; completed work is kept in the checkpoint.
    {
        let cancel = orchestrator.cancellation_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            eprintln!("cancelling run...");
            cancel.cancel();
        });
    }

    let report = if args.resume {
        let checkpoint = store
            .load()?
            .ok_or_else(|| anyhow!("no checkpoint found at {}", store.path().display()))?;
        if checkpoint.is_finished() {
            println!("{}", checkpoint.summary());
            println!("nothing to resume");
            return Ok(());
        }
        if args.dry_run {
            let graph = checkpoint.remaining_graph()?;
            print_dry_run(&cfg, &orchestrator, &graph)?;
            return Ok(());
        }
        orchestrator.resume(checkpoint).await?
    } else {
        let graph_path = args
            .graph
            .as_deref()
            .ok_or_else(|| anyhow!("--graph is required unless --resume or --status is given"))?;
        let graph = load_graph(graph_path)?;
        if args.dry_run {
            print_dry_run(&cfg, &orchestrator, &graph)?;
            return Ok(());
        }
        // A graph that cannot be planned must not cost the previous checkpoint.
        orchestrator.plan(&graph)?;
        if cfg.checkpoint.enabled && store.delete()? {
            info!(run = %store.run_name(), "starting fresh; previous checkpoint replaced");
        }
        orchestrator.run(&graph).await?
    };

    print_report(&report);
    if report.status != RunStatus::Completed {
        bail!("run finished with status '{}'", report.status);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("run {}", report.status);
    for batch in &report.batches {
        println!("  batch {} ({})", batch.index, batch.state);
        for task in &batch.tasks {
            match &task.error {
                Some(err) => println!(
                    "    - {} {} after {} attempt(s): {err}",
                    task.task_id, task.state, task.attempts
                ),
                None => println!("    - {} {}", task.task_id, task.state),
            }
        }
    }
    let c = report.counts;
    println!(
        "{} completed, {} failed, {} skipped, {} not run",
        c.completed,
        c.failed,
        c.skipped,
        c.pending + c.retrying + c.in_progress
    );
    if !report.gates.is_empty() {
        println!("gates:");
        for gate in &report.gates {
            println!("  - {gate}");
        }
    }
    println!();
    println!("{}", report.statistics);
}

/// Summaries of every stored run, one block per run.
fn print_status(dir: &str) -> Result<()> {
    let summaries = CheckpointStore::list(dir)?;
    if summaries.is_empty() {
        println!("no checkpoints under {dir}");
        return Ok(());
    }
    for (i, summary) in summaries.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{summary}");
    }
    Ok(())
}

/// Manual gate round; any failure is returned as an error.
async fn run_gates_once(gates: &QualityGates) -> Result<()> {
    if gates.is_empty() {
        println!("no quality gates configured");
        return Ok(());
    }
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let results = gates.run(&cancel).await;
    for result in &results {
        println!("{result}");
    }
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        bail!("{failed} quality gate(s) failed");
    }
    Ok(())
}

/// Print the resolved settings and the batch plan; dispatches nothing.
fn print_dry_run(cfg: &ConfigFile, orchestrator: &Orchestrator, graph: &TaskGraph) -> Result<()> {
    let batches = orchestrator.plan(graph)?;
    let exec = &cfg.execution;

    println!("batchdag dry-run");
    println!("  max_parallel_tasks = {}", exec.max_parallel_tasks);
    println!("  failure_strategy = {}", exec.failure_strategy);
    println!("  max_retries = {}", exec.max_retries);
    println!("  mode = {}", cfg.execution_mode());
    if let Some(fallback) = orchestrator.router().fallback() {
        println!("  fallback_executor = {fallback}");
    }
    println!("  executors = {:?}", orchestrator.router().executors());
    println!();

    println!("batches ({}):", batches.len());
    for batch in &batches {
        println!("  batch {} (level {})", batch.index, batch.level);
        for id in &batch.tasks {
            let Some(task) = graph.get(id) else { continue };
            let mark = if orchestrator.router().is_registered(&task.executor) {
                ""
            } else {
                " (unregistered)"
            };
            println!("    - {} [{}{}] {}", task.id, task.executor, mark, task.display_label());
            if !task.predecessors.is_empty() {
                println!("        after: {:?}", task.predecessors);
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
