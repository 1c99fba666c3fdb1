//! Process-exit cleanup.
//!
//! Regions, semaphores and child processes outlive a host that is killed
//! by a signal, because `Drop` never runs. Owners register an undo
//! action here and hold the returned [`CleanupGuard`]; dropping the guard
//! (normal teardown) deregisters the action without running it.
//! [`install_exit_hook`] arranges for every still-registered action to
//! run when the process receives SIGINT/SIGTERM.
//!
//! The registry is process-wide by necessity: a signal handler has no
//! other way to reach the resources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Once, OnceLock};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{info, warn};

type Action = Box<dyn FnOnce() + Send>;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);
static INSTALL: Once = Once::new();

fn registry() -> &'static Mutex<IndexMap<u64, (String, Action)>> {
    static REGISTRY: OnceLock<Mutex<IndexMap<u64, (String, Action)>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(IndexMap::new()))
}

/// Deregisters its action on drop.
#[must_use = "dropping the guard deregisters the cleanup action"]
pub struct CleanupGuard {
    key: u64,
}

impl CleanupGuard {
    /// Run the action now (if it has not run yet) and deregister it.
    pub fn run_now(self) {
        let entry = registry().lock().shift_remove(&self.key);
        if let Some((_, action)) = entry {
            action();
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        registry().lock().shift_remove(&self.key);
    }
}

impl std::fmt::Debug for CleanupGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupGuard").field("key", &self.key).finish()
    }
}

/// Register `action` to run if the process is terminated by a signal.
pub fn register(label: impl Into<String>, action: impl FnOnce() + Send + 'static) -> CleanupGuard {
    let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    registry()
        .lock()
        .insert(key, (label.into(), Box::new(action)));
    CleanupGuard { key }
}

/// Number of registered actions.
pub fn pending() -> usize {
    registry().lock().len()
}

/// Run and deregister every action, newest first.
pub fn run_all() {
    let drained: Vec<(String, Action)> = {
        let mut reg = registry().lock();
        reg.drain(..).map(|(_, v)| v).collect()
    };
    for (label, action) in drained.into_iter().rev() {
        info!(resource = %label, "exit cleanup");
        action();
    }
}

/// Install a SIGINT/SIGTERM handler that runs [`run_all`] and exits
/// with status 130. Later calls are no-ops.
///
/// A host that installs its own handler should call [`run_all`] from it
/// instead.
pub fn install_exit_hook() {
    INSTALL.call_once(|| {
        let result = ctrlc::set_handler(|| {
            run_all();
            std::process::exit(130);
        });
        if let Err(e) = result {
            warn!(error = %e, "could not install exit cleanup handler");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn dropped_guard_does_not_run() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let guard = register("test", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        drop(guard);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_now_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let guard = register("test", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        guard.run_now();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
