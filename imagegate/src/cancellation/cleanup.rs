//! Cleanup registry and drop guard.
//!
//! Validation mounts filesystems and attaches loop devices; those must be
//! released on every exit path, including the enclosing future being dropped
//! on Ctrl-C. Callbacks are therefore synchronous and run from `Drop`.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

type CleanupFn = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// A callback for cleanup, with a name for diagnostics.
struct CleanupCallback {
    callback: CleanupFn,
    name: String,
}

/// Registry for cleanup callbacks executed in LIFO order.
#[derive(Default)]
pub struct CleanupRegistry {
    /// Registered callbacks.
    callbacks: Mutex<Vec<CleanupCallback>>,
}

impl CleanupRegistry {
    /// Creates a new cleanup registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup callback.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        self.callbacks.lock().push(CleanupCallback {
            callback: Box::new(callback),
            name: name.into(),
        });
    }

    /// Removes every callback registered under `name` without running it.
    ///
    /// Returns true if a callback was removed.
    pub fn unregister_by_name(&self, name: &str) -> bool {
        let mut callbacks = self.callbacks.lock();
        let initial_len = callbacks.len();
        callbacks.retain(|cb| cb.name != name);
        callbacks.len() < initial_len
    }

    /// Runs the callback registered under `name` now, ahead of the others.
    ///
    /// Returns `None` if nothing was registered under that name.
    pub fn run_named(&self, name: &str) -> Option<Result<(), String>> {
        let entry = {
            let mut callbacks = self.callbacks.lock();
            let index = callbacks.iter().rposition(|cb| cb.name == name)?;
            callbacks.remove(index)
        };
        Some(run_one(entry.name, entry.callback).map_err(|(_, msg)| msg))
    }

    /// Runs all cleanup callbacks in LIFO order.
    ///
    /// Failures (including panics) are collected but don't stop other
    /// callbacks from running. The registry is empty afterwards.
    pub fn run_all(&self) -> Vec<(String, String)> {
        let callbacks: Vec<CleanupCallback> = std::mem::take(&mut *self.callbacks.lock());

        callbacks
            .into_iter()
            .rev()
            .filter_map(|entry| run_one(entry.name, entry.callback).err())
            .collect()
    }

    /// Returns the number of pending cleanup callbacks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.lock().len()
    }
}

fn run_one(name: String, callback: CleanupFn) -> Result<(), (String, String)> {
    debug!(cleanup = %name, "Running cleanup");
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(msg)) => {
            warn!(cleanup = %name, "Cleanup failed: {}", msg);
            Err((name, msg))
        }
        Err(panic) => {
            let msg = format!("Cleanup callback panicked: {panic:?}");
            warn!(cleanup = %name, "{}", msg);
            Err((name, msg))
        }
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

/// Runs everything left in a registry when dropped.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    registry: Arc<CleanupRegistry>,
}

impl CleanupGuard {
    /// Creates a guard over a fresh registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the guarded registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CleanupRegistry> {
        &self.registry
    }

    /// Runs all callbacks now and returns the failures.
    pub fn finish(self) -> Vec<(String, String)> {
        self.registry.run_all()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.registry.pending_count() > 0 {
            let failures = self.registry.run_all();
            if !failures.is_empty() {
                warn!(count = failures.len(), "Some cleanup callbacks failed");
            }
        }
    }
}
