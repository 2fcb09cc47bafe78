// src/engine/gates.rs

//! Quality gates: shell checks run after batch barriers or once every batch
//! has run, depending on the configured [`GatePolicy`].

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::GatesSection;
use crate::exec::command::{shell, stderr_tail};
use crate::exec::CancellationToken;
use crate::types::{GateKind, GatePolicy};

/// Where in a run a gate round is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePoint {
    /// The batch with this index reached a completed barrier.
    BatchBarrier(usize),
    /// The last batch finished.
    RunComplete,
}

/// One configured gate command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateCheck {
    pub kind: GateKind,
    pub cmd: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// A failure stops the run and the rest of the round.
    pub blocking: bool,
}

impl GateCheck {
    pub fn new(kind: GateKind, cmd: impl Into<String>) -> Self {
        Self {
            kind,
            cmd: cmd.into(),
            working_dir: None,
            timeout: Duration::from_secs(300),
            blocking: true,
        }
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResult {
    pub kind: GateKind,
    pub passed: bool,
    pub blocking: bool,
    pub detail: Option<String>,
    pub duration: Duration,
}

impl GateResult {
    /// Whether this result stops the run.
    pub fn blocks(&self) -> bool {
        !self.passed && self.blocking
    }
}

impl fmt::Display for GateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match (self.passed, self.blocking) {
            (true, _) => "passed",
            (false, true) => "failed",
            (false, false) => "failed (non-blocking)",
        };
        write!(f, "{} {verdict} in {:.1}s", self.kind, self.duration.as_secs_f64())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// The gate commands of a run plus the policy that says when they run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityGates {
    policy: GatePolicy,
    checks: Vec<GateCheck>,
}

impl QualityGates {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            checks: Vec::new(),
        }
    }

    /// Enabled gates from `[gates]`, in build, lint, typecheck, test order.
    pub fn from_config(section: &GatesSection) -> Self {
        let checks = section
            .configured()
            .filter(|(_, gate)| gate.enabled)
            .map(|(kind, gate)| GateCheck {
                kind,
                cmd: gate.cmd.clone(),
                working_dir: gate.working_dir.as_ref().map(PathBuf::from),
                timeout: Duration::from_secs(gate.timeout_seconds),
                blocking: gate.fail_on_error,
            })
            .collect();
        Self {
            policy: section.policy,
            checks,
        }
    }

    pub fn with_check(mut self, check: GateCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    pub fn checks(&self) -> &[GateCheck] {
        &self.checks
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Whether the policy schedules a round at `point`.
    pub fn applies_at(&self, point: GatePoint) -> bool {
        if self.checks.is_empty() {
            return false;
        }
        matches!(
            (self.policy, point),
            (GatePolicy::PerBatch, GatePoint::BatchBarrier(_))
                | (GatePolicy::OnComplete, GatePoint::RunComplete)
        )
    }

    /// Run every gate in order. The round stops after the first blocking
    /// failure or once `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> Vec<GateResult> {
        let mut results = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            if cancel.is_cancelled() {
                break;
            }
            let result = run_check(check, cancel).await;
            let stop = result.blocks();
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }
}

async fn run_check(check: &GateCheck, cancel: &CancellationToken) -> GateResult {
    info!(gate = %check.kind, cmd = %check.cmd, "running quality gate");
    let started = Instant::now();

    let mut cmd = shell(&check.cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &check.working_dir {
        cmd.current_dir(dir);
    }

    let outcome: Result<(), String> = match cmd.spawn() {
        Err(e) => Err(format!("spawning gate process: {e}")),
        Ok(child) => tokio::select! {
            _ = cancel.cancelled() => Err("cancelled".to_string()),
            res = tokio::time::timeout(check.timeout, child.wait_with_output()) => match res {
                Ok(Ok(output)) if output.status.success() => Ok(()),
                Ok(Ok(output)) => {
                    let code = output.status.code().unwrap_or(-1);
                    let tail = stderr_tail(&output.stderr);
                    let tail = if tail.is_empty() {
                        stderr_tail(&output.stdout)
                    } else {
                        tail
                    };
                    if tail.is_empty() {
                        Err(format!("exit code {code}"))
                    } else {
                        Err(format!("exit code {code}: {tail}"))
                    }
                }
                Ok(Err(e)) => Err(format!("waiting for gate process: {e}")),
                Err(_) => Err(format!("timed out after {}s", check.timeout.as_secs_f64())),
            },
        },
    };

    let duration = started.elapsed();
    match outcome {
        Ok(()) => {
            debug!(gate = %check.kind, elapsed_ms = duration.as_millis() as u64, "quality gate passed");
            GateResult {
                kind: check.kind,
                passed: true,
                blocking: check.blocking,
                detail: None,
                duration,
            }
        }
        Err(detail) => {
            warn!(gate = %check.kind, blocking = check.blocking, error = %detail, "quality gate failed");
            GateResult {
                kind: check.kind,
                passed: false,
                blocking: check.blocking,
                detail: Some(detail),
                duration,
            }
        }
    }
}
