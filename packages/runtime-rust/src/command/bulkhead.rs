//! Bounded, per-key worker pool.
//!
//! Admission and execution are two semaphores: `core_size + max_queue_size`
//! admission permits bound how much work the bulkhead holds at once, and
//! `core_size` execution permits bound how much of it runs. Admission is
//! `try_acquire`, so a full bulkhead rejects without blocking the submitter.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use guardrail_core::OperationKey;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::config::BulkheadConfig;

/// Type-erased unit of work executed by a bulkhead worker.
pub type Work = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Returned when the bulkhead is full or shut down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bulkhead {key} rejected the submission")]
pub struct BulkheadRejected {
    pub key: OperationKey,
}

/// Point-in-time view of a bulkhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadMetrics {
    pub core_size: usize,
    pub max_queue_size: usize,
    /// Work currently holding a worker slot.
    pub active: usize,
    /// Work admitted but waiting for a worker slot.
    pub queued: usize,
    /// Cumulative count of work that finished running.
    pub executed: u64,
    /// Cumulative count of rejected submissions.
    pub rejected: u64,
}

/// Isolated worker pool for one operation key.
///
/// Workers are tasks on the shared tokio runtime, gated by semaphores. The
/// isolation is over task slots, not threads: work that awaits a slow
/// dependency only holds its own key's slots, but work that blocks its
/// thread (synchronous I/O, long CPU loops) stalls runtime threads every key
/// shares. Such operations should move the blocking part onto
/// `tokio::task::spawn_blocking` inside the protected operation.
#[derive(Debug)]
pub struct Bulkhead {
    key: OperationKey,
    config: BulkheadConfig,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    counters: Arc<Counters>,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicUsize,
    active: AtomicUsize,
    executed: AtomicU64,
    rejected: AtomicU64,
}

impl Bulkhead {
    #[must_use]
    pub fn new(key: OperationKey, config: BulkheadConfig) -> Self {
        tracing::debug!(
            key = %key,
            core_size = config.core_size,
            max_queue_size = config.max_queue_size,
            "creating bulkhead"
        );
        Self {
            key,
            admission: Arc::new(Semaphore::new(config.capacity())),
            workers: Arc::new(Semaphore::new(config.core_size)),
            config,
            counters: Arc::new(Counters::default()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    #[must_use]
    pub fn config(&self) -> BulkheadConfig {
        self.config
    }

    /// Hands `work` to a worker.
    ///
    /// Runs immediately if a worker slot is free, otherwise waits in the
    /// queue if there is room.
    ///
    /// # Errors
    ///
    /// Returns `BulkheadRejected` immediately when running and queued work
    /// already fill the bulkhead, or after [`Bulkhead::shutdown`].
    pub fn submit(&self, work: Work) -> Result<JoinHandle<()>, BulkheadRejected> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.reject());
        }
        let Ok(admitted) = Arc::clone(&self.admission).try_acquire_owned() else {
            return Err(self.reject());
        };

        let workers = Arc::clone(&self.workers);
        let counters = Arc::clone(&self.counters);
        counters.admitted.fetch_add(1, Ordering::AcqRel);
        let admitted_guard = CountGuard(Arc::clone(&counters), Slot::Admitted);

        Ok(tokio::spawn(async move {
            let _admitted = admitted;
            let _admitted_guard = admitted_guard;
            // FIFO: the semaphore serves waiters in arrival order.
            let Ok(_slot) = workers.acquire_owned().await else {
                return;
            };
            counters.active.fetch_add(1, Ordering::AcqRel);
            let _active_guard = CountGuard(Arc::clone(&counters), Slot::Active);
            work.await;
            counters.executed.fetch_add(1, Ordering::Relaxed);
        }))
    }

    #[must_use]
    pub fn metrics(&self) -> BulkheadMetrics {
        let admitted = self.counters.admitted.load(Ordering::Acquire);
        let active = self.counters.active.load(Ordering::Acquire);
        BulkheadMetrics {
            core_size: self.config.core_size,
            max_queue_size: self.config.max_queue_size,
            active,
            queued: admitted.saturating_sub(active),
            executed: self.counters.executed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops admitting work and waits for admitted work to finish, up to
    /// `timeout`.
    ///
    /// Returns `true` if everything drained.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.counters.admitted.load(Ordering::Acquire) == 0 {
                tracing::debug!(key = %self.key, "bulkhead drained");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    key = %self.key,
                    remaining = self.counters.admitted.load(Ordering::Acquire),
                    "bulkhead did not drain before timeout"
                );
                return false;
            }
            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn reject(&self) -> BulkheadRejected {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %self.key, "bulkhead full, rejecting");
        BulkheadRejected {
            key: self.key.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Admitted,
    Active,
}

/// Decrements a counter on drop, including when the worker panics or is aborted.
struct CountGuard(Arc<Counters>, Slot);

impl Drop for CountGuard {
    fn drop(&mut self) {
        let counter = match self.1 {
            Slot::Admitted => &self.0.admitted,
            Slot::Active => &self.0.active,
        };
        counter.fetch_sub(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
