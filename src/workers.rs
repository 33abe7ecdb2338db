//! Bounded worker pool for per-message handling tasks.
//!
//! Each topic reader acquires a permit before spawning a handling task, so a
//! slow store round-trip never stalls consumption of the next message, while
//! the number of in-flight handlers stays bounded: when the pool is at
//! capacity, permit acquisition delays further consumption instead of
//! growing without limit.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::WorkerSettings;
use crate::error::{AuthError, Result};

/// Internal statistics tracking.
#[derive(Default)]
struct PoolStats {
    /// Total permit requests
    submitted: AtomicU64,
    /// Handlers that completed successfully
    succeeded: AtomicU64,
    /// Handlers that completed with a failure
    failed: AtomicU64,
    /// Acquire timeouts
    timeouts: AtomicU64,
    /// Current in-flight handlers
    current: AtomicUsize,
    /// Peak in-flight handlers observed
    peak: AtomicUsize,
}

/// A permit held for the duration of one handling task.
///
/// Dropping the permit releases the slot; marking records the outcome first.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<PoolStats>,
}

impl WorkerPermit {
    /// Record a successful handler completion.
    pub fn mark_success(self) {
        self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed handler completion.
    pub fn mark_failure(self) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.stats.current.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Manages the bounded set of concurrent handling tasks.
pub struct WorkerPool {
    name: &'static str,
    max_in_flight: usize,
    acquire_timeout: Duration,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(settings: WorkerSettings, name: &'static str) -> Self {
        tracing::info!(
            pool = name,
            max_in_flight = settings.max_in_flight,
            "worker pool created"
        );

        Self {
            name,
            max_in_flight: settings.max_in_flight,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            semaphore: Arc::new(Semaphore::new(settings.max_in_flight)),
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Maximum concurrent handlers.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Current number of in-flight handlers.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.semaphore.available_permits()
    }

    /// Acquire a handler permit, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<WorkerPermit> {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    pool = self.name,
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "handler permit acquire timed out"
                );
                AuthError::internal(format!(
                    "worker pool '{}' acquire timeout after {}ms",
                    self.name,
                    self.acquire_timeout.as_millis()
                ))
            })?
            .map_err(|_| AuthError::internal(format!("worker pool '{}' closed", self.name)))?;

        let current = self.stats.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.peak.fetch_max(current, Ordering::Relaxed);

        Ok(WorkerPermit {
            _permit: permit,
            stats: self.stats.clone(),
        })
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            max_in_flight: self.max_in_flight,
            in_flight: self.in_flight(),
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            peak: self.stats.peak.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    pub max_in_flight: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub peak: usize,
}
