// tests/property_batching.rs

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use batchdag::dag::{Batcher, TaskGraph, TaskSpec};
use batchdag::types::ExecutionMode;
use batchdag_test_utils::spec;

// Acyclic by construction: task N may only depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<TaskSpec>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..4),
            num_tasks,
        )
        .prop_map(|raw_deps| {
            raw_deps
                .into_iter()
                .enumerate()
                .map(|(i, potential)| {
                    let mut builder = spec(&format!("task_{i}"), "x");
                    let deps: HashSet<usize> = potential
                        .into_iter()
                        .filter(|_| i > 0)
                        .map(|d| d % i.max(1))
                        .collect();
                    for dep in deps {
                        builder = builder.after(&format!("task_{dep}"));
                    }
                    builder.build()
                })
                .collect()
        })
    })
}

fn mode_strategy() -> impl Strategy<Value = ExecutionMode> {
    prop_oneof![Just(ExecutionMode::Parallel), Just(ExecutionMode::Serial)]
}

proptest! {
    #[test]
    fn partition_places_every_task_once_after_its_predecessors(
        specs in dag_strategy(12),
        mode in mode_strategy(),
        offset in 0usize..5,
    ) {
        let graph = TaskGraph::from_specs(specs).unwrap();
        let batches = Batcher::new(mode).starting_at(offset).partition(&graph).unwrap();

        let mut batch_of: HashMap<&str, usize> = HashMap::new();
        for batch in &batches {
            prop_assert!(!batch.is_empty());
            for id in &batch.tasks {
                prop_assert!(batch_of.insert(id.as_str(), batch.index).is_none(), "{} placed twice", id);
            }
        }
        prop_assert_eq!(batch_of.len(), graph.len());

        for task in graph.tasks() {
            for pred in &task.predecessors {
                prop_assert!(batch_of[pred.as_str()] < batch_of[task.id.as_str()]);
            }
        }

        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        let expected: Vec<usize> = (offset..offset + batches.len()).collect();
        prop_assert_eq!(indices, expected);

        if mode == ExecutionMode::Serial {
            prop_assert!(batches.iter().all(|b| b.len() == 1));
        }
    }

    #[test]
    fn partition_is_deterministic(specs in dag_strategy(10)) {
        let graph = TaskGraph::from_specs(specs).unwrap();
        let first = Batcher::new(ExecutionMode::Parallel).partition(&graph).unwrap();
        let second = Batcher::new(ExecutionMode::Parallel).partition(&graph).unwrap();
        prop_assert_eq!(first, second);
    }
}
