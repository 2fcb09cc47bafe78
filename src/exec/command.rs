// src/exec/command.rs

//! Shell-command capability used for `[executor.<name>]` entries.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::exec::backend::{
    BoxFuture, CancellationToken, Capability, ExecutionOutcome, TaskDescription,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of trailing stderr bytes kept in a failure detail.
const STDERR_TAIL: usize = 512;

/// Runs one shell command per task.
///
/// The task is described to the command through environment variables:
/// `BATCHDAG_TASK_ID`, `BATCHDAG_TASK_LABEL`, `BATCHDAG_EXECUTOR`,
/// `BATCHDAG_ATTEMPT`, `BATCHDAG_BATCH_INDEX` and, when set,
/// `BATCHDAG_OUTPUT_REF`.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    name: String,
    cmd: String,
    probe_cmd: Option<String>,
    enabled: bool,
}

impl CommandCapability {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            probe_cmd: None,
            enabled: true,
        }
    }

    pub fn from_config(name: &str, config: &ExecutorConfig) -> Self {
        Self {
            name: name.to_string(),
            cmd: config.cmd.clone(),
            probe_cmd: config.probe.clone(),
            enabled: config.enabled,
        }
    }

    pub fn with_probe(mut self, probe: impl Into<String>) -> Self {
        self.probe_cmd = Some(probe.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

pub(crate) fn shell(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

impl Capability for CommandCapability {
    fn execute(
        &self,
        task: TaskDescription,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, ExecutionOutcome> {
        Box::pin(async move {
            info!(
                task = %task.id,
                executor = %self.name,
                attempt = task.attempt,
                cmd = %self.cmd,
                "starting task process"
            );

            let mut cmd = shell(&self.cmd);
            cmd.env("BATCHDAG_TASK_ID", &task.id)
                .env("BATCHDAG_TASK_LABEL", &task.label)
                .env("BATCHDAG_EXECUTOR", &task.executor)
                .env("BATCHDAG_ATTEMPT", task.attempt.to_string())
                .env("BATCHDAG_BATCH_INDEX", task.batch_index.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(output_ref) = &task.output_ref {
                cmd.env("BATCHDAG_OUTPUT_REF", output_ref);
            }

            let child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    return ExecutionOutcome::failed(format!(
                        "spawning process for executor '{}': {e}",
                        self.name
                    ));
                }
            };

            tokio::select! {
                output = child.wait_with_output() => match output {
                    Ok(output) if output.status.success() => {
                        debug!(
                            task = %task.id,
                            stdout_bytes = output.stdout.len(),
                            "task process exited successfully"
                        );
                        ExecutionOutcome::completed()
                    }
                    Ok(output) => {
                        let code = output.status.code().unwrap_or(-1);
                        info!(task = %task.id, exit_code = code, "task process failed");
                        let tail = stderr_tail(&output.stderr);
                        if tail.is_empty() {
                            ExecutionOutcome::failed(format!("exit code {code}"))
                        } else {
                            ExecutionOutcome::failed(format!("exit code {code}: {tail}"))
                        }
                    }
                    Err(e) => ExecutionOutcome::failed(format!("waiting for process: {e}")),
                },
                _ = cancel.cancelled() => {
                    // Dropping the wait future drops the child, which kills it.
                    info!(task = %task.id, "cancellation requested; killing task process");
                    ExecutionOutcome::failed("cancelled")
                }
            }
        })
    }

    fn probe(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if !self.enabled {
                debug!(executor = %self.name, "executor disabled in configuration");
                return false;
            }
            let Some(probe) = &self.probe_cmd else {
                return true;
            };

            let mut cmd = shell(probe);
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true);

            match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
                Ok(Ok(status)) => status.success(),
                Ok(Err(e)) => {
                    warn!(executor = %self.name, error = %e, "executor probe failed to run");
                    false
                }
                Err(_) => {
                    warn!(executor = %self.name, "executor probe timed out");
                    false
                }
            }
        })
    }
}
