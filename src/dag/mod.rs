// src/dag/mod.rs

//! Task graph representation and batching.
//!
//! - [`task`] holds the ingested task spec and the validated task type.
//! - [`graph`] holds the immutable, validated task DAG.
//! - [`batcher`] partitions the graph into level-ordered batches.
//! - [`loader`] reads the JSON graph document produced upstream.

pub mod batcher;
pub mod graph;
pub mod loader;
pub mod task;

pub use batcher::{partition, Batch, Batcher};
pub use graph::TaskGraph;
pub use loader::{graph_from_json, load_graph, GraphDocument};
pub use task::{ExecutorId, Task, TaskId, TaskSpec};
