use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What the runner does when a task fails.
///
/// - `Ask`: block until an external collaborator decides (retry / skip / abort).
/// - `Retry`: re-dispatch automatically up to `max_retries` times.
/// - `Skip`: mark the task `skipped` and keep going.
/// - `FailFast`: abort the whole run after the current batch barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    Ask,
    Retry,
    Skip,
    FailFast,
}

impl Default for FailureStrategy {
    fn default() -> Self {
        FailureStrategy::Ask
    }
}

impl FailureStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStrategy::Ask => "ask",
            FailureStrategy::Retry => "retry",
            FailureStrategy::Skip => "skip",
            FailureStrategy::FailFast => "fail_fast",
        }
    }
}

impl fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ask" => Ok(FailureStrategy::Ask),
            "retry" => Ok(FailureStrategy::Retry),
            "skip" => Ok(FailureStrategy::Skip),
            "fail_fast" | "failfast" => Ok(FailureStrategy::FailFast),
            other => Err(format!(
                "invalid failure_strategy: {other} (expected \"ask\", \"retry\", \"skip\" or \"fail_fast\")"
            )),
        }
    }
}

/// Delay shape between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay before every retry.
    Fixed,
    /// `delay * 2^(attempt - 1)`.
    Exponential,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        RetryBackoff::Fixed
    }
}

/// How the tasks of one batch are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// All tasks of a partition level run concurrently.
    Parallel,
    /// One task per batch, for chains that must never race.
    Serial,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Parallel
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel => f.write_str("parallel"),
            ExecutionMode::Serial => f.write_str("serial"),
        }
    }
}

/// When configured quality gates run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// After every completed batch barrier.
    PerBatch,
    /// Once, after the last batch.
    OnComplete,
    /// Only through `--run-gates`.
    Manual,
}

impl Default for GatePolicy {
    fn default() -> Self {
        GatePolicy::OnComplete
    }
}

impl fmt::Display for GatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatePolicy::PerBatch => f.write_str("per_batch"),
            GatePolicy::OnComplete => f.write_str("on_complete"),
            GatePolicy::Manual => f.write_str("manual"),
        }
    }
}

/// A quality gate. Gates of one round run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Build,
    Lint,
    Typecheck,
    Test,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::Build => "build",
            GateKind::Lint => "lint",
            GateKind::Typecheck => "typecheck",
            GateKind::Test => "test",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_strategy_parses_loosely() {
        assert_eq!("ASK".parse::<FailureStrategy>(), Ok(FailureStrategy::Ask));
        assert_eq!(" retry ".parse::<FailureStrategy>(), Ok(FailureStrategy::Retry));
        assert_eq!("fail-fast".parse::<FailureStrategy>(), Ok(FailureStrategy::FailFast));
        assert!("explode".parse::<FailureStrategy>().is_err());
    }
}
