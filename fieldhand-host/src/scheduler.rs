//! Bounded-concurrency spawner for conversation tasks.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Concurrency limits for queued conversations.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerLimits {
    max_concurrent_queries: NonZeroUsize,
}

impl SchedulerLimits {
    /// Creates limits with the supplied concurrency cap.
    #[must_use]
    pub const fn new(max_concurrent_queries: NonZeroUsize) -> Self {
        Self {
            max_concurrent_queries,
        }
    }

    /// Returns the concurrency cap.
    #[must_use]
    pub const fn max_concurrent_queries(self) -> NonZeroUsize {
        self.max_concurrent_queries
    }
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(32).expect("non-zero"))
    }
}

/// Wrapper around `tokio::spawn` that caps the number of conversation
/// loops running at once. Transports that serve many queries at a time
/// submit each `process_query` future here instead of spawning directly.
///
/// There is no cancellation: a spawned conversation always runs to its own
/// termination (final answer, abort, or budget exhaustion).
#[derive(Debug, Clone)]
pub struct QueryScheduler {
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    limits: SchedulerLimits,
}

impl QueryScheduler {
    /// Constructs a scheduler with the provided limits.
    #[must_use]
    pub fn new(limits: SchedulerLimits) -> Self {
        let permits = limits.max_concurrent_queries().get();
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            closed: Arc::new(AtomicBool::new(false)),
            limits,
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> SchedulerLimits {
        self.limits
    }

    /// Returns `true` if the scheduler has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the scheduler, preventing new conversations from starting.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();
    }

    /// Spawns a conversation future, respecting the concurrency cap.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler is closed
    /// before the task is enqueued.
    ///
    /// # Panics
    ///
    /// Panics if the scheduler is closed while a task is awaiting a
    /// concurrency permit; `close` must not race with submission.
    pub fn spawn<F, T>(&self, future: F) -> SchedulerResult<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let semaphore = Arc::clone(&self.semaphore);

        let handle = tokio::spawn(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .expect("scheduler closed while awaiting permit");
            let output = future.await;
            drop(permit);
            output
        });

        Ok(handle)
    }
}

impl Default for QueryScheduler {
    fn default() -> Self {
        Self::new(SchedulerLimits::default())
    }
}

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Scheduler is closed and will not accept new conversations.
    #[error("scheduler closed")]
    Closed,
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn respects_the_concurrency_cap() {
        let scheduler = QueryScheduler::new(SchedulerLimits::new(NonZeroUsize::new(2).unwrap()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(
                scheduler
                    .spawn(async move {
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap(),
            );
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_prevents_new_conversations() {
        let scheduler = QueryScheduler::default();
        scheduler.close();

        let result = scheduler.spawn(async move {});
        assert_eq!(result.unwrap_err(), SchedulerError::Closed);
    }
}
