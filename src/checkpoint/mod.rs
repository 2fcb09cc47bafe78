// src/checkpoint/mod.rs

//! Checkpoints written at batch boundaries so an interrupted run can resume
//! from its first incomplete batch.

pub mod model;
pub mod store;

pub use model::{Checkpoint, CheckpointSummary, CHECKPOINT_VERSION};
pub use store::{sanitize_run_name, CheckpointStore};
