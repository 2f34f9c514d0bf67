use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use waypoint_core::{Error, Result};

/// Bounded-concurrency execution primitive.
///
/// Wraps a [`JoinSet`] behind a semaphore so at most `max_workers` units
/// of work run at once. Results come back in completion order, not
/// submission order.
pub struct WorkerPool<T> {
    semaphore: Arc<Semaphore>,
    join_set: JoinSet<T>,
    max_workers: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates a pool running at most `max_workers` units concurrently.
    /// A zero worker count is clamped to one.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            join_set: JoinSet::new(),
            max_workers,
        }
    }

    /// Submits a unit of work. Suspends until a worker slot frees up, so
    /// submission itself applies backpressure.
    ///
    /// # Errors
    /// Returns an error if the pool's semaphore has been closed.
    pub async fn spawn<F>(&mut self, work: F) -> Result<()>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|error| Error::Other(error.to_string()))?;

        self.join_set.spawn(async move {
            let output = work.await;
            drop(permit);
            output
        });
        Ok(())
    }

    /// Waits for the next unit of work to finish.
    ///
    /// # Errors
    /// Returns an error if the underlying worker panicked.
    pub async fn join_next(&mut self) -> Option<Result<T>> {
        self.join_set
            .join_next()
            .await
            .map(|joined| joined.map_err(|error| Error::ExecutionFailed(error.to_string())))
    }

    /// Aborts all in-flight work. Used on batch-deadline abort.
    pub fn abort_all(&mut self) {
        self.join_set.abort_all();
    }

    /// Number of in-flight units.
    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    /// Whether any work is in flight.
    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Configured concurrency bound.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_runs_all_work() {
        let mut pool: WorkerPool<usize> = WorkerPool::new(2);
        for index in 0..5 {
            if let Err(error) = pool.spawn(async move { index }).await {
                panic!("spawn failed: {error}");
            }
        }

        let mut seen = Vec::new();
        while let Some(result) = pool.join_next().await {
            match result {
                Ok(value) => seen.push(value),
                Err(error) => panic!("worker failed: {error}"),
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut pool: WorkerPool<()> = WorkerPool::new(2);
        for _ in 0..6 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let spawned = pool
                .spawn(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            if let Err(error) = spawned {
                panic!("spawn failed: {error}");
            }
        }
        while pool.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 2, "concurrency bound exceeded");
    }

    #[test]
    fn test_zero_workers_clamped() {
        let pool: WorkerPool<()> = WorkerPool::new(0);
        assert_eq!(pool.max_workers(), 1);
    }
}
