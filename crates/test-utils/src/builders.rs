#![allow(dead_code)]

use batchdag::config::{ConfigFile, ExecutorConfig, GateConfig, RawConfigFile};
use batchdag::dag::{TaskGraph, TaskSpec};
use batchdag::types::{FailureStrategy, GateKind, GatePolicy, RetryBackoff};

/// Start building a task spec.
pub fn spec(id: &str, executor: &str) -> TaskSpecBuilder {
    TaskSpecBuilder::new(id, executor)
}

/// Builder for `TaskSpec`.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(id: &str, executor: &str) -> Self {
        Self {
            spec: TaskSpec {
                id: id.to_string(),
                label: String::new(),
                executor: executor.to_string(),
                predecessors: vec![],
                estimated_duration_minutes: None,
                output_ref: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.spec.predecessors.push(dep.to_string());
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.spec.label = label.to_string();
        self
    }

    pub fn estimate_minutes(mut self, minutes: f64) -> Self {
        self.spec.estimated_duration_minutes = Some(minutes);
        self
    }

    pub fn output_ref(mut self, output: &str) -> Self {
        self.spec.output_ref = Some(output.to_string());
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

/// Builder for `TaskGraph`; tasks keep the order they are added in.
#[derive(Default)]
pub struct GraphBuilder {
    specs: Vec<TaskSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task with the given predecessors.
    pub fn task(mut self, id: &str, executor: &str, after: &[&str]) -> Self {
        let mut b = TaskSpecBuilder::new(id, executor);
        for dep in after {
            b = b.after(dep);
        }
        self.specs.push(b.build());
        self
    }

    pub fn with(mut self, spec: TaskSpecBuilder) -> Self {
        self.specs.push(spec.build());
        self
    }

    pub fn specs(&self) -> Vec<TaskSpec> {
        self.specs.clone()
    }

    pub fn build(self) -> TaskGraph {
        TaskGraph::from_specs(self.specs).expect("Failed to build valid graph from builder")
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.execution.max_parallel_tasks = n;
        self
    }

    pub fn strategy(mut self, strategy: FailureStrategy) -> Self {
        self.config.execution.failure_strategy = strategy;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.execution.max_retries = n;
        self
    }

    pub fn retry_delay_seconds(mut self, secs: u64) -> Self {
        self.config.execution.retry_delay_seconds = secs;
        self
    }

    pub fn backoff(mut self, backoff: RetryBackoff) -> Self {
        self.config.execution.retry_backoff = backoff;
        self
    }

    pub fn strict_order(mut self, on: bool) -> Self {
        self.config.execution.strict_order = on;
        self
    }

    pub fn executor(mut self, name: &str, cmd: &str) -> Self {
        self.config.executor.insert(
            name.to_string(),
            ExecutorConfig {
                cmd: cmd.to_string(),
                probe: None,
                enabled: true,
                timeout_minutes: None,
            },
        );
        self
    }

    pub fn fallback(mut self, name: &str) -> Self {
        self.config.routing.fallback_executor = Some(name.to_string());
        self
    }

    pub fn checkpoint_dir(mut self, dir: &std::path::Path) -> Self {
        self.config.checkpoint.enabled = true;
        self.config.checkpoint.dir = dir.display().to_string();
        self
    }

    pub fn without_checkpoints(mut self) -> Self {
        self.config.checkpoint.enabled = false;
        self
    }

    pub fn run_name(mut self, name: &str) -> Self {
        self.config.checkpoint.run_name = name.to_string();
        self
    }

    pub fn gate_policy(mut self, policy: GatePolicy) -> Self {
        self.config.gates.policy = policy;
        self
    }

    /// Add a gate; `blocking` maps to `fail_on_error`.
    pub fn gate(mut self, kind: GateKind, cmd: &str, blocking: bool) -> Self {
        let gate = GateConfig {
            cmd: cmd.to_string(),
            enabled: true,
            working_dir: None,
            timeout_seconds: 30,
            fail_on_error: blocking,
        };
        let slot = match kind {
            GateKind::Build => &mut self.config.gates.build,
            GateKind::Lint => &mut self.config.gates.lint,
            GateKind::Typecheck => &mut self.config.gates.typecheck,
            GateKind::Test => &mut self.config.gates.test,
        };
        *slot = Some(gate);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
