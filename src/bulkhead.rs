//! Bounded worker pool for upstream fan-out.
//!
//! A range sync may need to backfill hundreds of ids. Each fetch runs under a [`Bulkhead`]
//! permit, so at most `max_concurrent` upstream calls are in flight per pool; callers past the
//! cap queue for a permit instead of being rejected.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Pool admitting `max_concurrent` operations at once (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self { semaphore: Arc::new(Semaphore::new(max_concurrent)), max_concurrent }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Operations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Run `operation` once a permit is free. The permit is released when it completes.
    pub async fn run<T, Fut>(&self, operation: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        // The semaphore is never closed, so acquisition only fails if that invariant breaks;
        // run unguarded rather than dropping the work.
        let _permit = self.semaphore.acquire().await.ok();
        operation.await
    }

    /// Run every operation under this pool and collect the outputs in input order.
    pub async fn run_all<T, Fut, I>(&self, operations: I) -> Vec<T>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = T>,
    {
        futures::future::join_all(operations.into_iter().map(|op| self.run(op))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrency_never_exceeds_the_cap() {
        let bulkhead = Bulkhead::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let operations = (0..12).map(|i| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                i
            }
        });

        let results = bulkhead.run_all(operations).await;
        assert_eq!(results, (0..12).collect::<Vec<_>>());
        let observed = peak.load(Ordering::SeqCst);
        assert!(observed <= 3, "peak concurrency {} exceeded cap", observed);
        assert!(observed >= 2, "pool should actually run work in parallel");
    }

    #[tokio::test]
    async fn queued_work_runs_after_permits_free_up() {
        let bulkhead = Bulkhead::new(1);
        let holder = bulkhead.clone();
        let handle = tokio::spawn(async move {
            holder.run(tokio::time::sleep(Duration::from_millis(50))).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bulkhead.in_flight(), 1);

        let value = bulkhead.run(async { 7 }).await;
        assert_eq!(value, 7);
        handle.await.unwrap();
        assert_eq!(bulkhead.in_flight(), 0);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(Bulkhead::new(0).max_concurrent(), 1);
    }
}
