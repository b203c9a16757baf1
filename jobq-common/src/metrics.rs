//! Service counters and the in-progress gauge, served over HTTP as JSON.

use std::sync::{RwLock, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// A copy of all metric values at one point in time.
///
/// Counters only ever increase (`total_jobs_created` is the single
/// exception, see [`MetricsRegistry::dec_created`]); the in-progress gauge
/// moves in both directions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "total_jobs_created")]
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_in_progress: u64,
}

/// Shared metric state, mutated by the HTTP surface, the workers and the
/// sweeper.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: RwLock<MetricsSnapshot>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, MetricsSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an admitted job.
    pub fn inc_created(&self) {
        self.write().jobs_created += 1;
    }

    /// Back out the admission of a job whose enqueue was rejected. The only
    /// legal counter decrement in the system.
    pub fn dec_created(&self) {
        let mut metrics = self.write();
        metrics.jobs_created = metrics.jobs_created.saturating_sub(1);
    }

    /// Record a failed job handed back to the queue by the sweeper.
    pub fn inc_retried(&self) {
        self.write().jobs_retried += 1;
    }

    /// Record the start of a processing attempt.
    pub fn inc_in_progress(&self) {
        self.write().jobs_in_progress += 1;
    }

    /// Record a completed job. The in-progress gauge is decremented in the
    /// same critical section, keeping it consistent with the terminal
    /// transition for any observer.
    pub fn inc_completed(&self) {
        let mut metrics = self.write();
        metrics.jobs_completed += 1;
        metrics.jobs_in_progress = metrics.jobs_in_progress.saturating_sub(1);
    }

    /// Record a failed job. Decrements the in-progress gauge in the same
    /// critical section, like [`MetricsRegistry::inc_completed`].
    pub fn inc_failed(&self) {
        let mut metrics = self.write();
        metrics.jobs_failed += 1;
        metrics.jobs_in_progress = metrics.jobs_in_progress.saturating_sub(1);
    }

    /// Return a copy of the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}
