// src/exec/backend.rs

//! Pluggable executor capability abstraction.
//!
//! The runner never talks to a concrete backend. Every executor identity is
//! resolved by the [`crate::exec::ExecutorRouter`] to a `Capability`, which
//! performs one task and reports an [`ExecutionOutcome`].
//!
//! - [`crate::exec::CommandCapability`] is the production implementation that
//!   runs a configured shell command.
//! - Tests provide their own `Capability` that scripts outcomes without
//!   spawning processes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::dag::{ExecutorId, TaskId};

pub use tokio_util::sync::CancellationToken;

/// Boxed future returned by capabilities.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a capability needs to know about the task it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescription {
    pub id: TaskId,
    pub label: String,
    /// Identity the task was routed to.
    pub executor: ExecutorId,
    /// Identity the task asked for; differs from `executor` after a fallback.
    pub requested_executor: ExecutorId,
    pub output_ref: Option<String>,
    /// 1-based dispatch attempt within this run.
    pub attempt: u32,
    pub batch_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Completed => f.write_str("completed"),
            OutcomeStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    pub detail: Option<String>,
}

impl ExecutionOutcome {
    pub fn completed() -> Self {
        Self {
            status: OutcomeStatus::Completed,
            detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// A named backend able to perform tasks.
///
/// `execute` must watch `cancel` and return promptly once it fires; the
/// runner records the task as failed in that case regardless of the
/// returned outcome.
pub trait Capability: Send + Sync {
    fn execute(
        &self,
        task: TaskDescription,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, ExecutionOutcome>;

    /// Best-effort availability check. Called at most once per run unless
    /// the router cache is invalidated.
    fn probe(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }
}
