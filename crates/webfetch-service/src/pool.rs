//! A bounded pool of workers executing request futures.
//!
//! Work is spawned onto a tokio runtime right away, but only a limited number of work units
//! make progress at any time. The others wait for a permit in submission order, as the
//! [`Semaphore`] is fair.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// The error returned when spawning onto a pool that was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the worker pool is shut down")]
pub struct PoolClosed;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Creates a pool running at most `size` work units concurrently on `handle`.
    pub fn new(handle: Handle, size: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size.max(1))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Queues a work unit.
    ///
    /// The future is dropped without completing if the pool is shut down forcefully before it
    /// finishes. Fails once [`shutdown`](Self::shutdown) was called, in which case the future is
    /// dropped without being polled.
    pub fn spawn<F>(&self, work: F) -> Result<(), PoolClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(PoolClosed);
        }

        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        let task = async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = async move {
                    // the semaphore is never closed
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    work.await
                } => {}
            }
        };
        self.tracker.spawn_on(task, &self.handle);
        Ok(())
    }

    /// The number of work units that are queued or running.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting work and waits for the outstanding work units.
    ///
    /// With `drain`, outstanding work gets up to `timeout` to complete. Whatever is left after
    /// that, or everything when not draining, is cancelled. Returns `true` if all work completed
    /// without being cancelled.
    pub async fn shutdown(&self, drain: bool, timeout: Duration) -> bool {
        self.tracker.close();

        if drain {
            let outstanding = self.tracker.len();
            tracing::debug!(outstanding, "Draining worker pool");
            if tokio::time::timeout(timeout, self.tracker.wait())
                .await
                .is_ok()
            {
                return true;
            }
            tracing::warn!(
                outstanding = self.tracker.len(),
                "Worker pool did not drain in time, cancelling outstanding work",
            );
        }

        self.cancel.cancel();
        self.tracker.wait().await;
        false
    }
}
