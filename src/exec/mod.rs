// src/exec/mod.rs

//! Executor layer.
//!
//! - [`backend`] defines the `Capability` trait every executor backend
//!   implements, plus the task description and outcome types.
//! - [`command`] is the production capability that runs a shell command
//!   per task using `tokio::process::Command`.
//! - [`router`] maps executor identities to capabilities, probes their
//!   availability and substitutes the fallback.

pub mod backend;
pub mod command;
pub mod router;

pub use backend::{
    BoxFuture, CancellationToken, Capability, ExecutionOutcome, OutcomeStatus, TaskDescription,
};
pub use command::CommandCapability;
pub use router::{ExecutorRouter, Resolution};
