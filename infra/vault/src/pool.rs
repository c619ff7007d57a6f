//! Bounded pool for CPU-bound work.
//!
//! PBKDF2 stretching is slow on purpose and AEAD work scales with input size; both run
//! on the blocking thread pool behind a semaphore so a burst of requests queues up
//! instead of starving the async executor.

use crate::error::VaultError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool that runs at most `size` jobs at once. A `size` of zero is raised to one.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs that could start right now without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queues `job` and returns a handle that can be awaited or cancelled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, T>(&self, job: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Result<T, VaultError> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let inner = tokio::spawn(async move {
            let _permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|_| VaultError::worker("worker pool is closed"))?;
            trace!(available = permits.available_permits(), "Worker permit acquired");

            tokio::task::spawn_blocking(job).await.map_err(|err| {
                if err.is_panic() {
                    VaultError::worker("job panicked")
                } else {
                    VaultError::worker("job was cancelled")
                }
            })?
        });
        TaskHandle { inner }
    }

    /// Runs `job` on the pool and waits for its result.
    ///
    /// # Errors
    /// Returns the job's own error, or [`VaultError::Worker`] if the pool is closed
    /// or the job panicked.
    pub async fn run<F, T>(&self, job: F) -> Result<T, VaultError>
    where
        F: FnOnce() -> Result<T, VaultError> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(job).await
    }

    /// Rejects queued and future jobs. Jobs already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Handle to a job queued on a [`WorkerPool`].
///
/// Cancelling drops the result. A job already executing on a blocking thread still runs
/// to completion, since the underlying primitive cannot be interrupted.
#[derive(Debug)]
#[must_use = "a task handle does nothing unless awaited or cancelled"]
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T, VaultError>>,
}

impl<T> TaskHandle<T> {
    pub fn cancel(&self) {
        self.inner.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, VaultError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().inner).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(VaultError::worker("task was cancelled")),
            Err(_) => Err(VaultError::worker("task panicked")),
        })
    }
}
