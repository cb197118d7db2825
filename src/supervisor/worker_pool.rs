//! Bounded pool for observer and router callbacks
//!
//! Spawning callbacks keeps a slow handler from stalling the transport's event
//! loop. Concurrency is capped by a semaphore; callbacks beyond the cap wait
//! for a permit. Pooled message callbacks may complete out of arrival order.

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl WorkerPool {
    /// Pool on the current runtime; must be called within a Tokio runtime
    pub fn new(max_concurrency: usize) -> Self {
        Self::with_handle(Handle::current(), max_concurrency)
    }

    /// Pool on an explicit runtime
    pub fn with_handle(handle: Handle, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Run `task` once a permit is free
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Permits not currently held by running callbacks
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_zero_concurrency_is_raised_to_one() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let pool = WorkerPool::with_handle(runtime.handle().clone(), 0);
        assert_eq!(pool.max_concurrency(), 1);
    }
}
