use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batchdag::exec::{
    BoxFuture, CancellationToken, Capability, ExecutionOutcome, ExecutorRouter, TaskDescription,
};

/// One scripted dispatch result.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(String),
    /// Sleep, then succeed.
    Sleep(Duration),
    /// Sleep, then fail.
    SleepThenFail(Duration, String),
    /// Never finish on its own; returns once cancelled.
    Hang,
}

impl Step {
    pub fn fail(detail: &str) -> Self {
        Step::Fail(detail.to_string())
    }
}

/// A recorded dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub task_id: String,
    pub executor: String,
    pub requested_executor: String,
    pub attempt: u32,
    pub batch_index: usize,
}

/// A fake capability that:
/// - records every dispatch it receives
/// - plays back a per-task script of outcomes, then succeeds
/// - tracks how many dispatches were running at once
pub struct ScriptedCapability {
    name: String,
    default_delay: Duration,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    log: Arc<Mutex<Vec<Dispatch>>>,
    available: AtomicBool,
    probes: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_log(name, Arc::new(Mutex::new(Vec::new())))
    }

    /// Share one dispatch log between several capabilities.
    pub fn with_log(name: &str, log: Arc<Mutex<Vec<Dispatch>>>) -> Arc<Self> {
        Self::build(name, Duration::from_millis(5), log)
    }

    /// Unscripted dispatches sleep for `delay` before succeeding.
    pub fn with_delay(name: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, delay, Arc::new(Mutex::new(Vec::new())))
    }

    fn build(name: &str, default_delay: Duration, log: Arc<Mutex<Vec<Dispatch>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            default_delay,
            scripts: Mutex::new(HashMap::new()),
            log,
            available: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Outcomes for the next dispatches of `task`, in order.
    pub fn script(&self, task: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn set_available(&self, up: bool) {
        self.available.store(up, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.log.lock().unwrap().clone()
    }

    pub fn dispatched_ids(&self) -> Vec<String> {
        self.dispatches().into_iter().map(|d| d.task_id).collect()
    }

    pub fn count_for(&self, task: &str) -> usize {
        self.dispatches().iter().filter(|d| d.task_id == task).count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, task: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(task)
            .and_then(|q| q.pop_front())
            .unwrap_or(Step::Sleep(self.default_delay))
    }
}

/// Decrements the running count even when the dispatch future is dropped.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Capability for ScriptedCapability {
    fn execute(
        &self,
        task: TaskDescription,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, ExecutionOutcome> {
        Box::pin(async move {
            self.log.lock().unwrap().push(Dispatch {
                task_id: task.id.clone(),
                executor: self.name.clone(),
                requested_executor: task.requested_executor.clone(),
                attempt: task.attempt,
                batch_index: task.batch_index,
            });

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _running = RunningGuard(&self.running);

            let step = self.next_step(&task.id);
            match step {
                Step::Succeed => ExecutionOutcome::completed(),
                Step::Fail(detail) => ExecutionOutcome::failed(detail),
                Step::Sleep(d) => tokio::select! {
                    _ = cancel.cancelled() => ExecutionOutcome::failed("cancelled"),
                    _ = tokio::time::sleep(d) => ExecutionOutcome::completed(),
                },
                Step::SleepThenFail(d, detail) => tokio::select! {
                    _ = cancel.cancelled() => ExecutionOutcome::failed("cancelled"),
                    _ = tokio::time::sleep(d) => ExecutionOutcome::failed(detail),
                },
                Step::Hang => {
                    cancel.cancelled().await;
                    ExecutionOutcome::failed("cancelled")
                }
            }
        })
    }

    fn probe(&self) -> BoxFuture<'_, bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let up = self.available.load(Ordering::SeqCst);
        Box::pin(async move { up })
    }
}

/// Router with each capability registered under its own name.
pub fn router_with(caps: &[Arc<ScriptedCapability>]) -> ExecutorRouter {
    let mut router = ExecutorRouter::new();
    for cap in caps {
        router.register(cap.name().to_string(), Arc::clone(cap) as Arc<dyn Capability>);
    }
    router
}
