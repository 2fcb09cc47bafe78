// src/ledger/mod.rs

//! Progress ledger: the single source of truth for task and batch state.
//!
//! - [`state`] holds the state lattices.
//! - [`event`] holds the records delivered to progress subscribers.
//! - [`ledger`] holds the shared, lattice-checked [`Ledger`].
//! - [`stats`] folds the event stream into per-executor totals.

pub mod event;
#[allow(clippy::module_inception)]
pub mod ledger;
pub mod state;
pub mod stats;

pub use event::{EventKind, LedgerEvent};
pub use ledger::{Ledger, LedgerEntry, LedgerSnapshot, StateCounts};
pub use state::{BatchState, RunStatus, TaskState};
pub use stats::{ExecutorStats, RunStatistics};
