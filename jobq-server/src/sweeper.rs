//! Periodically return retryable failed jobs to the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jobq_common::metrics::MetricsRegistry;
use jobq_common::registry::{Job, JobRegistry, JobStatus};

use crate::dispatch::JobSender;

pub struct Sweeper {
    registry: Arc<JobRegistry>,
    metrics: Arc<MetricsRegistry>,
    sender: JobSender,
    interval: Duration,
    max_attempts: u32,
    shutdown: CancellationToken,
}

impl Sweeper {
    pub fn new(
        registry: Arc<JobRegistry>,
        metrics: Arc<MetricsRegistry>,
        sender: JobSender,
        interval: Duration,
        max_attempts: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            metrics,
            sender,
            interval,
            max_attempts,
            shutdown,
        }
    }

    /// Run scan passes on a fixed interval until the shutdown token fires.
    pub async fn run(self) {
        info!(interval = ?self.interval, "sweeper started");

        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep(),
            }
        }

        info!("sweeper stopped");
    }

    /// One pass over the registry snapshot.
    ///
    /// Each failed job with attempts to spare is returned to `Pending` and
    /// offered to the dispatch channel without blocking. A full channel
    /// leaves the job pending and moves on; an individual registry error
    /// is logged and skipped, never aborting the pass.
    fn sweep(&self) {
        let retryable: Vec<Job> = self
            .registry
            .list()
            .into_iter()
            .filter(|job| job.status == JobStatus::Failed && job.attempts < self.max_attempts)
            .collect();

        if retryable.is_empty() {
            return;
        }

        debug!(count = retryable.len(), "found retryable failed jobs");

        for job in retryable {
            if self.shutdown.is_cancelled() {
                return;
            }

            let job_id = job.id;
            if let Err(err) = self.registry.mark_pending(&job_id) {
                error!(job_id = %job_id, %err, "could not return job to pending");
                continue;
            }

            match self.sender.try_send(job_id) {
                Ok(()) => {
                    self.metrics.inc_retried();
                    info!(job_id = %job_id, attempt = job.attempts, "job re-queued for retry");
                }
                Err(TrySendError::Full(_)) => {
                    debug!(job_id = %job_id, "dispatch channel full, leaving job pending");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(job_id = %job_id, "dispatch channel closed, aborting sweep");
                    return;
                }
            }
        }
    }
}
