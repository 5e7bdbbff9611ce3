//! Bounded offload pool for external-service calls.
//!
//! Every classifier, rewrite, and image call goes through `WorkerPool::run`
//! so a burst of slow upstream requests cannot starve event dispatch. The
//! pool is a plain semaphore: `run` waits for a permit, awaits the future,
//! and releases the permit when the future completes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Semaphore-bounded "run this future, await the result" primitive.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool allowing `size` concurrent calls.
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Run a future under a pool permit, waiting for one if the pool is full.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire only fails if the pool
        // itself is gone; in that case run unbounded rather than lose work.
        let _permit = self.permits.acquire().await.ok();
        fut.await
    }

    /// Permits currently available (for diagnostics).
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
