// src/engine/mod.rs

//! Execution engine for batchdag.
//!
//! This module ties together:
//! - the failure policy consulted on every task failure
//! - the decision providers used by the `ask` strategy
//! - the batch runner that dispatches batches in order and records every
//!   transition in the ledger
//! - the quality gates the runner calls at batch barriers or at the end
//!
//! The policy is pure ([`policy`]); the async shell that talks to executors,
//! deciders and the checkpoint store lives in [`runner`].

pub mod decider;
pub mod gates;
pub mod policy;
pub mod runner;

pub use decider::{ChannelDecider, Decider, Decision, DecisionRequest, PendingDecision, StdinDecider};
pub use gates::{GateCheck, GatePoint, GateResult, QualityGates};
pub use policy::{FailurePolicy, PolicyAction};
pub use runner::{BatchReport, BatchRunner, RunReport, RunnerOptions, TaskReport};
