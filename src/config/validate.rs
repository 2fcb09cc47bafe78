use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{BatchdagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::BatchdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_execution(cfg)?;
    validate_executors(cfg)?;
    validate_routing(cfg)?;
    validate_checkpoint(cfg)?;
    validate_gates(cfg)?;
    Ok(())
}

fn validate_execution(cfg: &RawConfigFile) -> Result<()> {
    let exec = &cfg.execution;

    if exec.max_parallel_tasks == 0 {
        return Err(BatchdagError::ConfigError(
            "[execution].max_parallel_tasks must be >= 1 (got 0)".to_string(),
        ));
    }
    if exec.task_timeout_minutes == 0 {
        return Err(BatchdagError::ConfigError(
            "[execution].task_timeout_minutes must be >= 1 (got 0)".to_string(),
        ));
    }
    if exec.batch_timeout_minutes == 0 {
        return Err(BatchdagError::ConfigError(
            "[execution].batch_timeout_minutes must be >= 1 (got 0)".to_string(),
        ));
    }
    for (key, value) in [
        ("task_timeout_minutes", exec.task_timeout_minutes),
        ("batch_timeout_minutes", exec.batch_timeout_minutes),
    ] {
        check_minutes(&format!("[execution].{key}"), value)?;
    }
    if !exec.timeout_grace.is_finite() || exec.timeout_grace < 1.0 {
        return Err(BatchdagError::ConfigError(format!(
            "[execution].timeout_grace must be a finite number >= 1.0 (got {})",
            exec.timeout_grace
        )));
    }

    Ok(())
}

fn validate_executors(cfg: &RawConfigFile) -> Result<()> {
    for (name, ec) in cfg.executor.iter() {
        if ec.cmd.trim().is_empty() {
            return Err(BatchdagError::ConfigError(format!(
                "executor '{}' has an empty `cmd`",
                name
            )));
        }
        if ec.timeout_minutes == Some(0) {
            return Err(BatchdagError::ConfigError(format!(
                "executor '{}' has timeout_minutes = 0",
                name
            )));
        }
        if let Some(m) = ec.timeout_minutes {
            check_minutes(&format!("[executor.{name}].timeout_minutes"), m)?;
        }
    }
    Ok(())
}

fn check_minutes(key: &str, minutes: u64) -> Result<()> {
    match minutes.checked_mul(60) {
        Some(_) => Ok(()),
        None => Err(BatchdagError::ConfigError(format!(
            "{key} is too large (got {minutes})"
        ))),
    }
}

fn validate_routing(cfg: &RawConfigFile) -> Result<()> {
    if let Some(ref fallback) = cfg.routing.fallback_executor {
        if !cfg.executor.contains_key(fallback) {
            return Err(BatchdagError::ConfigError(format!(
                "[routing].fallback_executor '{}' is not defined as [executor.{}]",
                fallback, fallback
            )));
        }
    }
    Ok(())
}

fn validate_checkpoint(cfg: &RawConfigFile) -> Result<()> {
    if cfg.checkpoint.enabled && cfg.checkpoint.run_name.trim().is_empty() {
        return Err(BatchdagError::ConfigError(
            "[checkpoint].run_name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_gates(cfg: &RawConfigFile) -> Result<()> {
    for (kind, gate) in cfg.gates.configured() {
        if gate.enabled && gate.cmd.trim().is_empty() {
            return Err(BatchdagError::ConfigError(format!(
                "[gates.{kind}] has an empty `cmd`"
            )));
        }
        if gate.timeout_seconds == 0 {
            return Err(BatchdagError::ConfigError(format!(
                "[gates.{kind}].timeout_seconds must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{ExecutorConfig, GateConfig};

    fn executor(cmd: &str) -> ExecutorConfig {
        ExecutorConfig {
            cmd: cmd.to_string(),
            probe: None,
            enabled: true,
            timeout_minutes: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ConfigFile::try_from(RawConfigFile::default()).is_ok());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let mut raw = RawConfigFile::default();
        raw.execution.max_parallel_tasks = 0;
        match ConfigFile::try_from(raw) {
            Err(BatchdagError::ConfigError(msg)) => assert!(msg.contains("max_parallel_tasks")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn fallback_must_be_a_defined_executor() {
        let mut raw = RawConfigFile::default();
        raw.routing.fallback_executor = Some("claude".to_string());
        assert!(ConfigFile::try_from(raw.clone()).is_err());

        raw.executor.insert("claude".to_string(), executor("echo hi"));
        assert!(ConfigFile::try_from(raw).is_ok());
    }

    #[test]
    fn timeouts_that_overflow_seconds_are_rejected() {
        let mut raw = RawConfigFile::default();
        raw.execution.batch_timeout_minutes = u64::MAX / 2;
        match ConfigFile::try_from(raw) {
            Err(BatchdagError::ConfigError(msg)) => assert!(msg.contains("batch_timeout_minutes")),
            other => panic!("expected ConfigError, got {other:?}"),
        }

        let mut raw = RawConfigFile::default();
        let mut slow = executor("run");
        slow.timeout_minutes = Some(u64::MAX);
        raw.executor.insert("slow".to_string(), slow);
        assert!(ConfigFile::try_from(raw).is_err());

        let mut raw = RawConfigFile::default();
        raw.execution.task_timeout_minutes = u64::MAX / 60;
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert_eq!(
            cfg.runner_options().default_task_timeout.as_secs(),
            (u64::MAX / 60) * 60
        );
    }

    #[test]
    fn empty_executor_command_is_rejected() {
        let mut raw = RawConfigFile::default();
        raw.executor.insert("codex".to_string(), executor("   "));
        assert!(ConfigFile::try_from(raw).is_err());
    }

    #[test]
    fn gates_need_a_command_and_a_timeout() {
        let gate = |cmd: &str, timeout_seconds: u64| GateConfig {
            cmd: cmd.to_string(),
            enabled: true,
            working_dir: None,
            timeout_seconds,
            fail_on_error: true,
        };

        let mut raw = RawConfigFile::default();
        raw.gates.lint = Some(gate(" ", 60));
        match ConfigFile::try_from(raw) {
            Err(BatchdagError::ConfigError(msg)) => assert!(msg.contains("[gates.lint]")),
            other => panic!("expected ConfigError, got {other:?}"),
        }

        let mut raw = RawConfigFile::default();
        raw.gates.test = Some(gate("cargo test", 0));
        assert!(ConfigFile::try_from(raw).is_err());

        let mut raw = RawConfigFile::default();
        let mut disabled = gate("", 60);
        disabled.enabled = false;
        raw.gates.build = Some(disabled);
        assert!(ConfigFile::try_from(raw).is_ok());
    }
}
