//! Cleanup registry
//!
//! Hooks run once when a run ends, in registration order, whatever the
//! outcome. A failing or panicking hook is logged and the next one still runs.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Async end-of-run callback
#[async_trait]
pub trait CleanupHook: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F> CleanupHook for FnHook<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Wrap a closure returning a boxed future as a [`CleanupHook`]
pub fn hook_fn<F>(f: F) -> Arc<dyn CleanupHook>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

/// Ordered, name-keyed set of cleanup hooks
#[derive(Default)]
pub struct CleanupRegistry {
    hooks: Vec<(String, Arc<dyn CleanupHook>)>,
    ran: AtomicBool,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. A second registration under the same name is ignored,
    /// so a module installed twice still cleans up once.
    pub fn register(&mut self, name: impl Into<String>, hook: Arc<dyn CleanupHook>) -> bool {
        let name = name.into();
        if self.hooks.iter().any(|(existing, _)| *existing == name) {
            warn!(hook = %name, "cleanup hook already registered, ignoring");
            return false;
        }
        self.hooks.push((name, hook));
        true
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|(name, _)| name.as_str())
    }

    /// Arm the registry for a new run
    pub fn reset(&self) {
        self.ran.store(false, Ordering::SeqCst);
    }

    /// Run every hook once. Calls after the first one in a run are no-ops
    /// until [`CleanupRegistry::reset`].
    pub async fn run_all(&self) -> usize {
        if self.ran.swap(true, Ordering::SeqCst) {
            debug!("cleanup already ran for this run");
            return 0;
        }

        let mut failures = 0;
        for (name, hook) in &self.hooks {
            match AssertUnwindSafe(hook.run()).catch_unwind().await {
                Ok(Ok(())) => debug!(hook = %name, "cleanup hook finished"),
                Ok(Err(err)) => {
                    failures += 1;
                    error!(hook = %name, "cleanup hook failed: {:#}", err);
                }
                Err(_) => {
                    failures += 1;
                    error!(hook = %name, "cleanup hook panicked");
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Arc<dyn CleanupHook> {
        let log = log.clone();
        hook_fn(move || {
            let log = log.clone();
            async move {
                log.lock().push(label);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_runs_in_order_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CleanupRegistry::new();
        assert!(registry.register("first", recording(&log, "first")));
        assert!(registry.register("second", recording(&log, "second")));
        assert!(!registry.register("first", recording(&log, "dup")));
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.run_all().await, 0);
        assert_eq!(registry.run_all().await, 0);
        assert_eq!(*log.lock(), vec!["first", "second"]);

        registry.reset();
        registry.run_all().await;
        assert_eq!(*log.lock(), vec!["first", "second", "first", "second"]);
    }

    fn explode() -> anyhow::Result<()> {
        panic!("hook blew up")
    }

    #[tokio::test]
    async fn test_failing_hooks_do_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CleanupRegistry::new();
        registry.register(
            "broken",
            hook_fn(|| async { Err(anyhow::anyhow!("restore failed")) }.boxed()),
        );
        registry.register(
            "panicking",
            hook_fn(|| async { explode() }.boxed()),
        );
        registry.register("last", recording(&log, "last"));

        assert_eq!(registry.run_all().await, 2);
        assert_eq!(*log.lock(), vec!["last"]);
    }
}
