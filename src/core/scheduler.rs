//! Shared admission control for import tasks.
//!
//! Foreground imports wait for one of a fixed number of permits. Background
//! imports skip the queue and run immediately.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct ImportScheduler {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl ImportScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn run<F>(&self, background: bool, task: F) -> F::Output
    where
        F: Future,
    {
        if background {
            return task.await;
        }
        // The semaphore is never closed, so acquire only fails in theory
        let _permit = self.permits.acquire().await.ok();
        task.await
    }

    /// Permits not currently held by running tasks
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_foreground_holds_a_permit() {
        let scheduler = ImportScheduler::new(1);
        let observed = scheduler
            .run(false, async { scheduler.available() })
            .await;
        assert_eq!(observed, 0);
        assert_eq!(scheduler.available(), 1);
    }

    #[tokio::test]
    async fn test_background_bypasses_full_queue() {
        let scheduler = ImportScheduler::new(1);
        let blocker = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .run(false, tokio::time::sleep(Duration::from_millis(300)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            scheduler.run(true, async { 42 }),
        )
        .await;
        assert_eq!(result.unwrap(), 42);

        blocker.await.unwrap();
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ImportScheduler::new(0).capacity(), 1);
    }
}
