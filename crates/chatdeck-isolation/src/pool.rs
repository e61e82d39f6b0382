//! Per-lane worker pool for blocking work

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::IsolationError;
use crate::Result;

/// Runs closures on the blocking thread pool, at most `size` at a time.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running a job
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }

    pub async fn run<F, R>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| IsolationError::Worker("worker pool is shut down".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| IsolationError::Worker(e.to_string()))
    }

    /// Refuse new jobs; jobs already running finish on their own
    pub fn shutdown(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_blocking_job() {
        let pool = WorkerPool::new(2);
        let value = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(matches!(
            pool.run(|| ()).await,
            Err(IsolationError::Worker(_))
        ));
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let pool = WorkerPool::new(1);
        let result = pool.run(|| -> u32 { panic!("boom") }).await;
        assert!(matches!(result, Err(IsolationError::Worker(_))));
        // The permit is released even though the job panicked
        assert_eq!(pool.idle(), 1);
    }
}
