// src/checkpoint/store.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::checkpoint::model::{Checkpoint, CheckpointSummary, CHECKPOINT_VERSION};
use crate::config::CheckpointSection;
use crate::errors::{BatchdagError, Result};

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// File-backed checkpoint location for one run name:
/// `<dir>/<run_name>/checkpoint.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStore {
    dir: PathBuf,
    run_name: String,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, run_name: &str) -> Self {
        Self {
            dir: dir.into(),
            run_name: sanitize_run_name(run_name),
        }
    }

    pub fn from_config(section: &CheckpointSection) -> Self {
        Self::new(&section.dir, &section.run_name)
    }

    /// Summaries of every run stored under `dir`, sorted by run name.
    ///
    /// A missing `dir` lists nothing. Unreadable checkpoints are logged and
    /// left out.
    pub fn list(dir: impl AsRef<Path>) -> Result<Vec<CheckpointSummary>> {
        let dir = dir.as_ref();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run_name = entry.file_name().to_string_lossy().into_owned();
            let store = Self {
                dir: dir.to_path_buf(),
                run_name,
            };
            match store.load() {
                Ok(Some(checkpoint)) => summaries.push(checkpoint.summary()),
                Ok(None) => {}
                Err(e) => warn!(run = %store.run_name, error = %e, "skipping unreadable checkpoint"),
            }
        }
        summaries.sort_by(|a, b| a.run_name.cmp(&b.run_name));
        Ok(summaries)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.run_name).join(CHECKPOINT_FILE)
    }

    /// Write `checkpoint` atomically: a temp file in the same directory is
    /// renamed over the previous checkpoint.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path();
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        debug!(
            path = %path.display(),
            next_batch = checkpoint.next_batch_index,
            remaining = checkpoint.remaining.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// The stored checkpoint, or `None` if there is none.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let path = self.path();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_str(&contents).map_err(|e| {
            BatchdagError::CheckpointError(format!("{}: {e}", path.display()))
        })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(BatchdagError::CheckpointError(format!(
                "{}: unsupported checkpoint version {} (expected {})",
                path.display(),
                checkpoint.version,
                CHECKPOINT_VERSION
            )));
        }
        Ok(Some(checkpoint))
    }

    /// Remove the stored checkpoint. Returns whether one existed.
    pub fn delete(&self) -> Result<bool> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "checkpoint deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Run names become directory names: anything outside `[A-Za-z0-9_-]` is
/// replaced by `_`.
pub fn sanitize_run_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
