// src/dag/loader.rs

//! Task graph ingestion from the upstream planning document.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dag::graph::TaskGraph;
use crate::dag::task::TaskSpec;
use crate::errors::Result;

/// On-disk shape of a task graph: `{"tasks": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// Parse a graph document from JSON text and validate it.
pub fn graph_from_json(text: &str) -> Result<TaskGraph> {
    let doc: GraphDocument = serde_json::from_str(text)?;
    TaskGraph::from_specs(doc.tasks)
}

/// Read and validate a graph document from disk.
pub fn load_graph(path: impl AsRef<Path>) -> Result<TaskGraph> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let graph = graph_from_json(&contents)?;
    info!(path = %path.display(), tasks = graph.len(), "task graph loaded");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BatchdagError;

    #[test]
    fn parses_camel_case_fields() {
        let g = graph_from_json(
            r#"{"tasks": [
                {"id": "schema", "label": "DB schema", "executor": "codex",
                 "estimatedDurationMinutes": 2, "outputRef": "db/schema.sql"},
                {"id": "api", "executor": "codex", "predecessors": ["schema"]}
            ]}"#,
        )
        .unwrap();

        let schema = g.get("schema").unwrap();
        assert_eq!(schema.output_ref.as_deref(), Some("db/schema.sql"));
        assert_eq!(schema.estimated_duration.unwrap().as_secs(), 120);
        assert_eq!(g.get("api").unwrap().predecessors, vec!["schema".to_string()]);
    }

    #[test]
    fn missing_executor_is_a_json_error() {
        let err = graph_from_json(r#"{"tasks": [{"id": "a"}]}"#).unwrap_err();
        assert!(matches!(err, BatchdagError::JsonError(_)));
    }
}
