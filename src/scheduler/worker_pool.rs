// src/scheduler/worker_pool.rs
//! Worker pool for agent jobs
//!
//! Jobs run as tokio tasks tracked by a `TaskTracker`, so the scheduler
//! tick never waits on agent work and shutdown can wait for in-flight jobs.
//!
//! ```text
//! WorkerPool
//! ├─ tracker: in-flight jobs (closed on shutdown)
//! ├─ permits: optional cap on concurrently running jobs
//! └─ counters: submitted / completed
//! ```
//!
//! The scheduler's `max_concurrent_agents` already bounds dispatch, so the
//! pool itself is unbounded unless `max_workers` is set.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Configuration for the worker pool
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolConfig {
    /// Upper bound on concurrently running jobs (default: unbounded)
    pub max_workers: Option<usize>,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub in_flight: usize,
    pub closed: bool,
}

#[derive(Debug)]
pub struct WorkerPool {
    tracker: TaskTracker,
    permits: Option<Arc<Semaphore>>,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(WorkerPoolConfig::default())
    }
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: config.max_workers.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            submitted: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `job` on the pool. Returns false once the pool has been closed.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!("Worker pool closed, job rejected");
            return false;
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        let completed = Arc::clone(&self.completed);
        let permits = self.permits.clone();

        self.tracker.spawn(async move {
            // Wait for a slot (backpressure) when the pool is bounded
            let _permit = match &permits {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };

            job.await;
            completed.fetch_add(1, Ordering::Relaxed);
        });

        true
    }

    /// Stop accepting jobs; running jobs continue
    pub fn close(&self) {
        self.tracker.close();
    }

    /// Resolves once the pool is closed and every job has finished
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            in_flight: self.tracker.len(),
            closed: self.tracker.is_closed(),
        }
    }
}
