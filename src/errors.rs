// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::ledger::{BatchState, TaskState};

#[derive(Error, Debug)]
pub enum BatchdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Malformed task graph: {0}")]
    MalformedGraph(String),

    #[error("Cycle detected in task graph: {0}")]
    GraphCycle(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Illegal ledger transition for task '{task}': {from} -> {to}")]
    IllegalTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("Illegal ledger transition for batch {batch}: {from} -> {to}")]
    IllegalBatchTransition {
        batch: usize,
        from: BatchState,
        to: BatchState,
    },

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BatchdagError>;
