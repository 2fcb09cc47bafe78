// src/exec/router.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::dag::ExecutorId;
use crate::errors::{BatchdagError, Result};
use crate::exec::backend::Capability;
use crate::exec::command::CommandCapability;

/// Capability chosen for one dispatch.
#[derive(Clone)]
pub struct Resolution {
    /// Identity actually used.
    pub executor: ExecutorId,
    pub capability: Arc<dyn Capability>,
    /// Requested identity when the fallback was substituted.
    pub substituted_for: Option<ExecutorId>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("executor", &self.executor)
            .field("substituted_for", &self.substituted_for)
            .finish_non_exhaustive()
    }
}

/// Owns the mapping from executor identity to capability.
///
/// Availability is probed lazily on first use and cached for the rest of the
/// run; [`ExecutorRouter::invalidate`] forces a new probe. Concurrent callers
/// that find the cache empty share a single probe round.
#[derive(Default)]
pub struct ExecutorRouter {
    registry: HashMap<ExecutorId, Arc<dyn Capability>>,
    fallback: Option<ExecutorId>,
    available: RwLock<Option<HashSet<ExecutorId>>>,
    /// Held while a probe round fills `available`.
    filling: AsyncMutex<()>,
}

impl fmt::Debug for ExecutorRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.registry.keys().collect();
        names.sort();
        f.debug_struct("ExecutorRouter")
            .field("executors", &names)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl ExecutorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`CommandCapability`] per `[executor.<name>]`, with the
    /// `[routing]` fallback.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut router = Self::new();
        for (name, ec) in &cfg.executor {
            router.register(name.clone(), Arc::new(CommandCapability::from_config(name, ec)));
        }
        if let Some(fallback) = &cfg.routing.fallback_executor {
            router = router.with_fallback(fallback.clone());
        }
        router
    }

    /// Register (or replace) the capability behind `name`.
    pub fn register(&mut self, name: impl Into<ExecutorId>, capability: Arc<dyn Capability>) {
        self.registry.insert(name.into(), capability);
        self.invalidate();
    }

    pub fn with_fallback(mut self, name: impl Into<ExecutorId>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    /// Registered identities, sorted.
    pub fn executors(&self) -> Vec<ExecutorId> {
        let mut names: Vec<ExecutorId> = self.registry.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop the cached availability set.
    pub fn invalidate(&self) {
        *self.available.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached(&self) -> Option<HashSet<ExecutorId>> {
        self.available
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Identities whose capability currently reports available.
    ///
    /// All capabilities are probed concurrently. A probe that panics counts
    /// as unavailable.
    pub async fn probe(&self) -> HashSet<ExecutorId> {
        if let Some(cached) = self.cached() {
            return cached;
        }

        let _filling = self.filling.lock().await;
        if let Some(cached) = self.cached() {
            return cached;
        }

        let mut set = JoinSet::new();
        for (name, capability) in &self.registry {
            let name = name.clone();
            let capability = Arc::clone(capability);
            set.spawn(async move {
                let up = capability.probe().await;
                (name, up)
            });
        }

        let mut available = HashSet::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, true)) => {
                    available.insert(name);
                }
                Ok((name, false)) => {
                    info!(executor = %name, "executor unavailable");
                }
                Err(e) => warn!(error = %e, "executor probe panicked"),
            }
        }

        debug!(available = ?available, "executor availability probed");
        *self.available.write().unwrap_or_else(PoisonError::into_inner) = Some(available.clone());
        available
    }

    /// Resolve `requested` to a usable capability, substituting the fallback
    /// when `requested` is unknown or unavailable.
    pub async fn resolve(&self, requested: &str) -> Result<Resolution> {
        let available = self.probe().await;

        if available.contains(requested)
            && let Some(capability) = self.registry.get(requested)
        {
            return Ok(Resolution {
                executor: requested.to_string(),
                capability: Arc::clone(capability),
                substituted_for: None,
            });
        }

        if let Some(fallback) = self.fallback.as_deref()
            && fallback != requested
            && available.contains(fallback)
            && let Some(capability) = self.registry.get(fallback)
        {
            warn!(
                requested = %requested,
                fallback = %fallback,
                "executor unavailable; substituting fallback"
            );
            return Ok(Resolution {
                executor: fallback.to_string(),
                capability: Arc::clone(capability),
                substituted_for: Some(requested.to_string()),
            });
        }

        let reason = if self.registry.contains_key(requested) {
            "is not available"
        } else {
            "is not registered"
        };
        Err(BatchdagError::ExecutorUnavailable(match &self.fallback {
            Some(fb) => format!("executor '{requested}' {reason} and fallback '{fb}' is unusable"),
            None => format!("executor '{requested}' {reason} and no fallback is configured"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::exec::backend::{BoxFuture, CancellationToken, ExecutionOutcome, TaskDescription};

    struct Static {
        up: bool,
        probes: AtomicUsize,
        probe_delay: Option<std::time::Duration>,
    }

    impl Static {
        fn new(up: bool) -> Arc<Self> {
            Arc::new(Self {
                up,
                probes: AtomicUsize::new(0),
                probe_delay: None,
            })
        }

        fn slow(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                up: true,
                probes: AtomicUsize::new(0),
                probe_delay: Some(std::time::Duration::from_millis(delay_ms)),
            })
        }
    }

    impl Capability for Static {
        fn execute(&self, _: TaskDescription, _: CancellationToken) -> BoxFuture<'_, ExecutionOutcome> {
            Box::pin(async { ExecutionOutcome::completed() })
        }

        fn probe(&self) -> BoxFuture<'_, bool> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let up = self.up;
            let delay = self.probe_delay;
            Box::pin(async move {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                up
            })
        }
    }

    #[tokio::test]
    async fn unavailable_executor_degrades_to_fallback() {
        let mut router = ExecutorRouter::new();
        router.register("codex", Static::new(false));
        router.register("claude", Static::new(true));
        let router = router.with_fallback("claude");

        let r = router.resolve("codex").await.unwrap();
        assert_eq!(r.executor, "claude");
        assert_eq!(r.substituted_for.as_deref(), Some("codex"));

        let r = router.resolve("gemini").await.unwrap();
        assert_eq!(r.substituted_for.as_deref(), Some("gemini"));
    }

    #[tokio::test]
    async fn unusable_fallback_is_an_error() {
        let mut router = ExecutorRouter::new();
        router.register("codex", Static::new(false));
        router.register("claude", Static::new(false));
        let router = router.with_fallback("claude");

        let err = router.resolve("codex").await.unwrap_err();
        assert!(matches!(err, BatchdagError::ExecutorUnavailable(_)));
    }

    #[tokio::test]
    async fn probe_results_are_cached_until_invalidated() {
        let cap = Static::new(true);
        let mut router = ExecutorRouter::new();
        router.register("a", cap.clone());

        router.resolve("a").await.unwrap();
        router.resolve("a").await.unwrap();
        assert_eq!(cap.probes.load(Ordering::SeqCst), 1);

        router.invalidate();
        router.resolve("a").await.unwrap();
        assert_eq!(cap.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_cold_resolves_share_one_availability_round() {
        let cap = Static::slow(20);
        let mut router = ExecutorRouter::new();
        router.register("a", cap.clone());

        let (r1, r2, r3) = tokio::join!(
            router.resolve("a"),
            router.resolve("a"),
            router.resolve("a")
        );
        assert!(r1.is_ok() && r2.is_ok() && r3.is_ok());
        assert_eq!(cap.probes.load(Ordering::SeqCst), 1);
    }
}
