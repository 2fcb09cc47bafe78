// src/engine/decider.rs

//! External decision providers for the `ask` failure strategy.
//!
//! - [`ChannelDecider`] forwards each request over an mpsc channel to an
//!   embedding application, which answers through [`PendingDecision`].
//! - [`StdinDecider`] prompts on stderr and reads the answer from stdin.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::dag::{ExecutorId, TaskId};
use crate::exec::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Skip,
    Abort,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Retry => f.write_str("retry"),
            Decision::Skip => f.write_str("skip"),
            Decision::Abort => f.write_str("abort"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "r" | "retry" => Ok(Decision::Retry),
            "s" | "skip" => Ok(Decision::Skip),
            "a" | "abort" => Ok(Decision::Abort),
            other => Err(format!("unknown decision '{other}' (expected retry, skip or abort)")),
        }
    }
}

/// A task failure waiting for a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRequest {
    pub task_id: TaskId,
    pub label: String,
    pub executor: ExecutorId,
    pub batch_index: usize,
    /// Dispatch attempt that just failed (1-based).
    pub attempt: u32,
    pub error: Option<String>,
}

/// Source of `ask` decisions. One call per failure; the call may block for
/// as long as the collaborator needs.
pub trait Decider: Send + Sync {
    fn decide(&self, request: DecisionRequest) -> BoxFuture<'_, Decision>;
}

/// A request delivered by [`ChannelDecider`].
#[derive(Debug)]
pub struct PendingDecision {
    pub request: DecisionRequest,
    reply: oneshot::Sender<Decision>,
}

impl PendingDecision {
    pub fn respond(self, decision: Decision) {
        if self.reply.send(decision).is_err() {
            debug!(task = %self.request.task_id, "decision arrived after the run stopped waiting");
        }
    }
}

/// Delivers decision requests on a channel.
///
/// If the receiving side is dropped, or drops a request without answering,
/// the decision is [`Decision::Abort`].
#[derive(Debug, Clone)]
pub struct ChannelDecider {
    tx: mpsc::Sender<PendingDecision>,
}

impl ChannelDecider {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PendingDecision>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl Decider for ChannelDecider {
    fn decide(&self, request: DecisionRequest) -> BoxFuture<'_, Decision> {
        Box::pin(async move {
            let task = request.task_id.clone();
            let (reply, rx) = oneshot::channel();
            if self.tx.send(PendingDecision { request, reply }).await.is_err() {
                warn!(task = %task, "decision channel closed; aborting");
                return Decision::Abort;
            }
            rx.await.unwrap_or_else(|_| {
                warn!(task = %task, "decision request dropped; aborting");
                Decision::Abort
            })
        })
    }
}

/// Interactive decider for the CLI.
///
/// Prompts are serialized, so concurrent failures are asked one at a time.
/// End of input means abort.
#[derive(Debug, Default)]
pub struct StdinDecider {
    lock: Mutex<()>,
}

impl StdinDecider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decider for StdinDecider {
    fn decide(&self, request: DecisionRequest) -> BoxFuture<'_, Decision> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut stderr = tokio::io::stderr();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            let header = format!(
                "\ntask '{}' ({}) failed on attempt {} via '{}': {}\n",
                request.task_id,
                request.label,
                request.attempt,
                request.executor,
                request.error.as_deref().unwrap_or("no detail"),
            );
            let _ = stderr.write_all(header.as_bytes()).await;

            loop {
                let _ = stderr.write_all(b"[r]etry, [s]kip or [a]bort? ").await;
                let _ = stderr.flush().await;

                match lines.next_line().await {
                    Ok(Some(line)) => match line.parse::<Decision>() {
                        Ok(decision) => return decision,
                        Err(e) => {
                            let _ = stderr.write_all(format!("{e}\n").as_bytes()).await;
                        }
                    },
                    Ok(None) => return Decision::Abort,
                    Err(e) => {
                        warn!(error = %e, "reading decision from stdin failed; aborting");
                        return Decision::Abort;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DecisionRequest {
        DecisionRequest {
            task_id: "t".into(),
            label: "T".into(),
            executor: "x".into(),
            batch_index: 0,
            attempt: 1,
            error: Some("boom".into()),
        }
    }

    #[tokio::test]
    async fn channel_decider_round_trips_answer() {
        let (decider, mut rx) = ChannelDecider::new(1);
        tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.request.task_id, "t");
            pending.respond(Decision::Skip);
        });
        assert_eq!(decider.decide(request()).await, Decision::Skip);
    }

    #[tokio::test]
    async fn dropped_receiver_means_abort() {
        let (decider, rx) = ChannelDecider::new(1);
        drop(rx);
        assert_eq!(decider.decide(request()).await, Decision::Abort);
    }

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!("R".parse::<Decision>().unwrap(), Decision::Retry);
        assert_eq!(" skip ".parse::<Decision>().unwrap(), Decision::Skip);
        assert!("maybe".parse::<Decision>().is_err());
    }
}
