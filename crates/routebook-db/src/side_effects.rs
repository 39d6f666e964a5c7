//! # Best-Effort Side Tasks
//!
//! Work that follows a committed mutation but must never undo it, such as
//! refreshing a booker's unauthorized discount aggregate after submission.
//!
//! ```text
//! submit_order ── tx.commit() ──► Ok(order) returned to caller
//!                      │
//!                      └── tasks.spawn("discount_aggregate", ...)
//!                               │
//!                               ├── Ok  → done
//!                               └── Err → warn!(...), nothing rolled back
//! ```
//!
//! [`SideTasks::settle`] awaits everything spawned so far; tests call it
//! before reading the results. A service that never settles still holds
//! only the handles of tasks that are running.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::WorkflowResult;

/// Handles of spawned side tasks. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct SideTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SideTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task whose failure is logged and otherwise ignored.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = WorkflowResult<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!(task = name, "Side task finished"),
                Err(e) => warn!(task = name, error = %e, "Side task failed"),
            }
        });
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tasks spawned and not yet settled. Finished tasks are
    /// dropped on the next spawn.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Waits for every task spawned so far.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Side task panicked or was cancelled");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        // A panic while holding the lock leaves the Vec intact.
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_settle_waits_for_all_tasks() {
        let tasks = SideTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            tasks.spawn("count", async move {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(tasks.pending(), 3);

        tasks.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_finished_tasks_are_pruned_on_spawn() {
        let tasks = SideTasks::new();
        for _ in 0..5 {
            tasks.spawn("quick", async { Ok(()) });
        }
        while tasks.lock().iter().any(|h| !h.is_finished()) {
            tokio::task::yield_now().await;
        }

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        tasks.spawn("held", async move {
            let _ = wait.await;
            Ok(())
        });
        assert_eq!(tasks.pending(), 1);

        release.send(()).unwrap();
        tasks.settle().await;
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_task_does_not_propagate() {
        let tasks = SideTasks::new();
        tasks.spawn("fails", async { Err(DbError::Internal("boom".to_string()).into()) });
        tasks.settle().await;
        assert_eq!(tasks.pending(), 0);
    }
}
