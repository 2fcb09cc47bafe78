use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{FailurePolicy, RunnerOptions};
use crate::types::{ExecutionMode, FailureStrategy, GateKind, GatePolicy, RetryBackoff};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [execution]
/// max_parallel_tasks = 5
/// failure_strategy = "retry"
///
/// [routing]
/// fallback_executor = "claude"
///
/// [executor.claude]
/// cmd = "claude -p \"$BATCHDAG_TASK_LABEL\""
///
/// [gates]
/// policy = "per_batch"
///
/// [gates.build]
/// cmd = "cargo build"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub execution: ExecutionSection,

    #[serde(default)]
    pub routing: RoutingSection,

    #[serde(default)]
    pub checkpoint: CheckpointSection,

    #[serde(default)]
    pub gates: GatesSection,

    /// Executor backends from `[executor.<name>]`, keyed by identity.
    #[serde(default)]
    pub executor: BTreeMap<String, ExecutorConfig>,
}

/// Validated configuration. Obtain one through `ConfigFile::try_from(raw)`
/// or [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub execution: ExecutionSection,
    pub routing: RoutingSection,
    pub checkpoint: CheckpointSection,
    pub gates: GatesSection,
    pub executor: BTreeMap<String, ExecutorConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            execution: raw.execution,
            routing: raw.routing,
            checkpoint: raw.checkpoint,
            gates: raw.gates,
            executor: raw.executor,
        }
    }

    /// Failure policy described by `[execution]`.
    pub fn failure_policy(&self) -> FailurePolicy {
        let exec = &self.execution;
        FailurePolicy {
            strategy: exec.failure_strategy,
            max_retries: exec.max_retries,
            retry_delay: Duration::from_secs(exec.retry_delay_seconds),
            backoff: exec.retry_backoff,
        }
    }

    /// Runner limits described by `[execution]` and the per-executor
    /// `timeout_minutes` overrides.
    pub fn runner_options(&self) -> RunnerOptions {
        let exec = &self.execution;
        let executor_timeouts: HashMap<String, Duration> = self
            .executor
            .iter()
            .filter_map(|(name, ec)| {
                ec.timeout_minutes
                    .map(|m| (name.clone(), minutes(m)))
            })
            .collect();

        RunnerOptions {
            max_parallel_tasks: exec.max_parallel_tasks,
            default_task_timeout: minutes(exec.task_timeout_minutes),
            batch_timeout: minutes(exec.batch_timeout_minutes),
            timeout_grace: exec.timeout_grace,
            executor_timeouts,
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.execution.strict_order {
            ExecutionMode::Serial
        } else {
            ExecutionMode::Parallel
        }
    }
}

/// Validation rejects values whose seconds overflow, so saturating here
/// only matters for unchecked configs.
fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

/// `[execution]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    /// Run-wide bound on concurrently dispatched tasks.
    #[serde(default = "default_max_parallel_tasks", alias = "maxParallelTasks")]
    pub max_parallel_tasks: usize,

    /// Timeout for tasks without a duration estimate.
    #[serde(default = "default_task_timeout_minutes", alias = "taskTimeoutMinutes")]
    pub task_timeout_minutes: u64,

    /// Upper bound on one batch barrier.
    #[serde(default = "default_batch_timeout_minutes", alias = "batchTimeoutMinutes")]
    pub batch_timeout_minutes: u64,

    #[serde(default, alias = "failureStrategy", alias = "error_strategy")]
    pub failure_strategy: FailureStrategy,

    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_seconds", alias = "retryDelaySeconds")]
    pub retry_delay_seconds: u64,

    #[serde(default, alias = "retryBackoff")]
    pub retry_backoff: RetryBackoff,

    /// Multiplier applied to a task's estimated duration to get its timeout.
    #[serde(default = "default_timeout_grace", alias = "timeoutGrace")]
    pub timeout_grace: f64,

    /// One task per batch, in level order.
    #[serde(default, alias = "strictOrder")]
    pub strict_order: bool,
}

fn default_max_parallel_tasks() -> usize {
    5
}

fn default_task_timeout_minutes() -> u64 {
    10
}

fn default_batch_timeout_minutes() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_timeout_grace() -> f64 {
    1.5
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            task_timeout_minutes: default_task_timeout_minutes(),
            batch_timeout_minutes: default_batch_timeout_minutes(),
            failure_strategy: FailureStrategy::default(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            retry_backoff: RetryBackoff::default(),
            timeout_grace: default_timeout_grace(),
            strict_order: false,
        }
    }
}

/// `[routing]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingSection {
    /// Identity substituted for unavailable executors.
    #[serde(default, alias = "fallbackExecutor", alias = "default_executor")]
    pub fallback_executor: Option<String>,
}

/// `[checkpoint]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,

    /// Directory holding one sub-directory per run name.
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,

    #[serde(default = "default_run_name", alias = "runName")]
    pub run_name: String,
}

fn default_checkpoint_enabled() -> bool {
    true
}

fn default_checkpoint_dir() -> String {
    ".batchdag/checkpoints".to_string()
}

fn default_run_name() -> String {
    "default".to_string()
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            dir: default_checkpoint_dir(),
            run_name: default_run_name(),
        }
    }
}

/// `[executor.<name>]` section: a shell-command backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Command run through `sh -c` for every task routed here.
    pub cmd: String,

    /// Optional availability probe; a zero exit status means available.
    #[serde(default)]
    pub probe: Option<String>,

    #[serde(default = "default_executor_enabled")]
    pub enabled: bool,

    /// Overrides `task_timeout_minutes` for tasks without an estimate.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

fn default_executor_enabled() -> bool {
    true
}

/// `[gates]` section: quality checks run between or after batches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatesSection {
    #[serde(default)]
    pub policy: GatePolicy,

    #[serde(default)]
    pub build: Option<GateConfig>,

    #[serde(default)]
    pub lint: Option<GateConfig>,

    #[serde(default)]
    pub typecheck: Option<GateConfig>,

    #[serde(default)]
    pub test: Option<GateConfig>,
}

impl GatesSection {
    /// Configured gates in run order, disabled ones included.
    pub fn configured(&self) -> impl Iterator<Item = (GateKind, &GateConfig)> {
        [
            (GateKind::Build, &self.build),
            (GateKind::Lint, &self.lint),
            (GateKind::Typecheck, &self.typecheck),
            (GateKind::Test, &self.test),
        ]
        .into_iter()
        .filter_map(|(kind, gate)| gate.as_ref().map(|g| (kind, g)))
    }
}

/// `[gates.<kind>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Command run through `sh -c`; exit status zero passes.
    #[serde(alias = "command")]
    pub cmd: String,

    #[serde(default = "default_gate_enabled")]
    pub enabled: bool,

    /// Directory the command runs in; the current directory when unset.
    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default = "default_gate_timeout_seconds")]
    pub timeout_seconds: u64,

    /// A failing blocking gate stops the run.
    #[serde(default = "default_gate_fail_on_error")]
    pub fail_on_error: bool,
}

fn default_gate_enabled() -> bool {
    true
}

fn default_gate_timeout_seconds() -> u64 {
    300
}

fn default_gate_fail_on_error() -> bool {
    true
}
