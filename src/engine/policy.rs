// src/engine/policy.rs

//! Pure failure-policy decisions. No IO; the runner acts on the result.

use std::time::Duration;

use crate::engine::decider::Decision;
use crate::types::{FailureStrategy, RetryBackoff};

/// Upper bound on a computed retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub strategy: FailureStrategy,
    /// Re-dispatches allowed after the first failure.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: RetryBackoff,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            strategy: FailureStrategy::Ask,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            backoff: RetryBackoff::Fixed,
        }
    }
}

/// What to do with a task that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Re-dispatch after `delay`.
    Retry { delay: Duration },
    /// Mark the task `skipped` and move on.
    Skip,
    /// Leave the task `failed` and move on.
    Fail,
    /// Stop dispatching for the rest of the run.
    Abort,
    /// Block for an external [`Decision`].
    Ask,
}

impl FailurePolicy {
    pub fn with_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Action after the `attempt`-th dispatch of a task failed (1-based).
    pub fn decide(&self, attempt: u32) -> PolicyAction {
        match self.strategy {
            FailureStrategy::Retry => self.retry_or_fail(attempt, self.retry_delay_for(attempt)),
            FailureStrategy::Skip => PolicyAction::Skip,
            FailureStrategy::FailFast => PolicyAction::Abort,
            FailureStrategy::Ask => PolicyAction::Ask,
        }
    }

    /// Turn an external decision into an action. A retry decision still
    /// counts against `max_retries`.
    pub fn resolve_decision(&self, decision: Decision, attempt: u32) -> PolicyAction {
        match decision {
            Decision::Retry => self.retry_or_fail(attempt, Duration::ZERO),
            Decision::Skip => PolicyAction::Skip,
            Decision::Abort => PolicyAction::Abort,
        }
    }

    fn retry_or_fail(&self, attempt: u32, delay: Duration) -> PolicyAction {
        if attempt <= self.max_retries {
            PolicyAction::Retry { delay }
        } else {
            PolicyAction::Fail
        }
    }

    /// Delay before the re-dispatch that follows the `attempt`-th failure.
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.retry_delay,
            RetryBackoff::Exponential => {
                let exp = attempt.saturating_sub(1).min(16);
                self.retry_delay
                    .saturating_mul(1u32 << exp)
                    .min(MAX_RETRY_DELAY)
            }
        }
    }
}
