//! Bounded background executor for logical-expiry rebuilds.
//!
//! Submissions never queue: when every worker permit is taken, or the
//! executor has been shut down, `try_spawn` refuses the task and the caller
//! keeps serving stale data.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Default number of concurrent rebuilds
pub const DEFAULT_REBUILD_WORKERS: usize = 10;

#[derive(Debug, Clone)]
pub struct RebuildExecutor {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    workers: usize,
}

impl Default for RebuildExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_REBUILD_WORKERS)
    }
}

impl RebuildExecutor {
    /// Create an executor running at most `workers` tasks at once (minimum 1).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks currently running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Start `task` if a worker is free. Returns whether it was started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn try_spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return false;
        }
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            return false;
        };

        self.tracker.spawn(async move {
            let _permit = permit;
            task.await;
        });
        true
    }

    /// Stop accepting tasks and wait for running ones to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.permits.close();
        debug!(in_flight = self.tracker.len(), "waiting for rebuilds to drain");
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_runs_task() {
        let executor = RebuildExecutor::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        assert!(executor.try_spawn(async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        executor.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejects_when_saturated() {
        let executor = RebuildExecutor::new(1);
        let (tx, rx) = oneshot::channel::<()>();

        assert!(executor.try_spawn(async move {
            let _ = rx.await;
        }));
        assert!(!executor.try_spawn(async {}));
        assert_eq!(executor.in_flight(), 1);

        tx.send(()).unwrap();
        executor.shutdown().await;
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_frees_permit_after_completion() {
        let executor = RebuildExecutor::new(1);
        assert!(executor.try_spawn(async {}));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.try_spawn(async {}));
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let executor = RebuildExecutor::new(4);
        executor.shutdown().await;
        assert!(executor.is_closed());
        assert!(!executor.try_spawn(async {}));
    }

    #[test]
    fn test_minimum_one_worker() {
        assert_eq!(RebuildExecutor::new(0).workers(), 1);
    }
}
