//! Structured task group for auxiliary async tasks.

use super::CancellationToken;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A group of related tasks with structured cancellation.
///
/// Tasks receive the group's token and are expected to return promptly once
/// it is cancelled. [`StructuredTaskGroup::shutdown`] cancels and then
/// awaits every task, so no task outlives the scope that spawned it.
pub struct StructuredTaskGroup {
    /// The cancellation token for this group.
    cancel_token: Arc<CancellationToken>,
    /// Handles to spawned tasks, with their names.
    handles: Mutex<Vec<(String, JoinHandle<Result<(), String>>)>>,
}

impl StructuredTaskGroup {
    /// Creates a new task group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel_token: Arc::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a task in the group.
    pub fn spawn<F, Fut>(&self, name: &str, task: F)
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let token = self.cancel_token.clone();
        let handle = tokio::spawn(async move { task(token).await });
        debug!(task = name, "Spawned task");
        self.handles.lock().push((name.to_string(), handle));
    }

    /// Cancels all tasks in the group.
    pub fn cancel_all(&self, reason: &str) {
        self.cancel_token.cancel(reason);
    }

    /// Waits for all tasks to complete.
    ///
    /// Returns the first error if any occurred.
    pub async fn wait(&self) -> Result<(), String> {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        let mut first_error = None;

        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(format!("Task join error: {join_error}")),
            };
            if let Err(e) = outcome {
                warn!(task = %name, "Task ended with error: {}", e);
                if first_error.is_none() {
                    self.cancel_token.cancel(&e);
                    first_error = Some(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Cancels every task and waits for all of them to finish.
    pub async fn shutdown(&self, reason: &str) -> Result<(), String> {
        self.cancel_all(reason);
        self.wait().await
    }

    /// Returns the number of pending tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Default for StructuredTaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StructuredTaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredTaskGroup")
            .field("task_count", &self.task_count())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_group_success() {
        let group = StructuredTaskGroup::new();

        group.spawn("task1", |_token| async { Ok(()) });
        group.spawn("task2", |_token| async { Ok(()) });

        assert_eq!(group.task_count(), 2);
        assert!(group.wait().await.is_ok());
        assert_eq!(group.task_count(), 0);
    }

    #[tokio::test]
    async fn test_task_group_with_error() {
        let group = StructuredTaskGroup::new();

        group.spawn("success", |_token| async { Ok(()) });
        group.spawn("failure", |_token| async { Err("Task failed".to_string()) });

        let result = group.wait().await;
        assert_eq!(result, Err("Task failed".to_string()));
        assert!(group.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_stops_sleeping_task() {
        let group = StructuredTaskGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        group.spawn("poller", move |token| async move {
            for _ in 0..100 {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    () = tokio::time::sleep(Duration::from_millis(10)) => {}
                }
            }
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(group.shutdown("primary finished").await.is_ok());

        let count = counter.load(Ordering::SeqCst);
        assert!(count < 100);
        assert_eq!(group.task_count(), 0);
    }
}
