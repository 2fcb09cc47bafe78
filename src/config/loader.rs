use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BatchdagError, Result};

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file, apply `BATCHDAG_*` environment overrides and
/// validate the result.
///
/// This is the recommended entry point for the rest of the application.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let mut raw_config = load_from_path(&path)?;
    apply_env_overrides(&mut raw_config, |key| std::env::var(key).ok())?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file yields the defaults
/// (still subject to environment overrides).
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    if path.exists() {
        return load_and_validate(path);
    }

    info!(path = %path.display(), "config file not found; using defaults");
    let mut raw_config = RawConfigFile::default();
    apply_env_overrides(&mut raw_config, |key| std::env::var(key).ok())?;
    ConfigFile::try_from(raw_config)
}

/// Apply environment overrides on top of the file contents.
///
/// `lookup` returns the value of a variable, if set. Recognised keys:
/// - `BATCHDAG_MAX_PARALLEL_TASKS`
/// - `BATCHDAG_TASK_TIMEOUT` (minutes)
/// - `BATCHDAG_FAILURE_STRATEGY`
/// - `BATCHDAG_FALLBACK_EXECUTOR`
pub fn apply_env_overrides<F>(cfg: &mut RawConfigFile, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("BATCHDAG_MAX_PARALLEL_TASKS") {
        cfg.execution.max_parallel_tasks = parse_env("BATCHDAG_MAX_PARALLEL_TASKS", &v)?;
        debug!(value = %v, "override from BATCHDAG_MAX_PARALLEL_TASKS");
    }
    if let Some(v) = lookup("BATCHDAG_TASK_TIMEOUT") {
        cfg.execution.task_timeout_minutes = parse_env("BATCHDAG_TASK_TIMEOUT", &v)?;
        debug!(value = %v, "override from BATCHDAG_TASK_TIMEOUT");
    }
    if let Some(v) = lookup("BATCHDAG_FAILURE_STRATEGY") {
        cfg.execution.failure_strategy = v
            .parse()
            .map_err(|e: String| BatchdagError::ConfigError(format!("BATCHDAG_FAILURE_STRATEGY: {e}")))?;
        debug!(value = %v, "override from BATCHDAG_FAILURE_STRATEGY");
    }
    if let Some(v) = lookup("BATCHDAG_FALLBACK_EXECUTOR") {
        let v = v.trim().to_string();
        cfg.routing.fallback_executor = if v.is_empty() { None } else { Some(v) };
        debug!("override from BATCHDAG_FALLBACK_EXECUTOR");
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        BatchdagError::ConfigError(format!("{key} has an invalid value: {value:?}"))
    })
}

/// Default config location: `Batchdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Batchdag.toml")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::FailureStrategy;

    #[test]
    fn env_overrides_take_priority() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BATCHDAG_MAX_PARALLEL_TASKS", "9"),
            ("BATCHDAG_FAILURE_STRATEGY", "fail_fast"),
        ]);
        let mut raw = RawConfigFile::default();

        apply_env_overrides(&mut raw, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(raw.execution.max_parallel_tasks, 9);
        assert_eq!(raw.execution.failure_strategy, FailureStrategy::FailFast);
        assert_eq!(raw.execution.task_timeout_minutes, 10);
    }

    #[test]
    fn bad_env_value_is_a_config_error() {
        let mut raw = RawConfigFile::default();
        let err = apply_env_overrides(&mut raw, |k| {
            (k == "BATCHDAG_TASK_TIMEOUT").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, BatchdagError::ConfigError(_)));
    }
}
