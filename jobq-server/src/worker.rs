//! Consume dispatched job ids and drive each claimed job to a terminal
//! state, exactly once per claim.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use jobq_common::metrics::MetricsRegistry;
use jobq_common::registry::JobRegistry;

use crate::dispatch::JobReceiver;
use crate::processor::Processor;

const SHUTDOWN_ABORT_REASON: &str = "aborted due to shutdown";

/// A single member of the worker pool.
pub struct Worker {
    /// An identifier for this worker, used in log events.
    id: usize,
    registry: Arc<JobRegistry>,
    metrics: Arc<MetricsRegistry>,
    processor: Arc<dyn Processor>,
    receiver: JobReceiver,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        registry: Arc<JobRegistry>,
        metrics: Arc<MetricsRegistry>,
        processor: Arc<dyn Processor>,
        receiver: JobReceiver,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            registry,
            metrics,
            processor,
            receiver,
            shutdown,
        }
    }

    /// Run this worker until its shutdown token fires or the dispatch
    /// channel is closed and drained.
    ///
    /// A lost claim is not an error: it means another worker owns the job
    /// or the job already left `Pending`. An in-flight job interrupted by
    /// shutdown is failed with a fixed reason so it never strands in
    /// `Processing`.
    pub async fn run(self) {
        info!(worker = self.id, "worker started");

        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = async { self.receiver.lock().await.recv().await } => received,
            };

            let Some(job_id) = received else {
                debug!(worker = self.id, "dispatch channel closed, exiting");
                break;
            };

            let Some(job) = self.registry.claim(&job_id) else {
                debug!(worker = self.id, job_id = %job_id, "claim lost, skipping job");
                continue;
            };

            self.metrics.inc_in_progress();
            debug!(worker = self.id, job_id = %job_id, attempt = job.attempts, "processing job");

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.finish_failed(&job_id, SHUTDOWN_ABORT_REASON);
                    break;
                }
                result = self.processor.process(&job) => match result {
                    Ok(()) => self.finish_completed(&job_id),
                    Err(err) => {
                        warn!(worker = self.id, job_id = %job_id, attempt = job.attempts, %err, "job attempt failed");
                        self.finish_failed(&job_id, &err.to_string());
                    }
                },
            }
        }

        info!(worker = self.id, "worker stopped");
    }

    fn finish_completed(&self, job_id: &Uuid) {
        match self.registry.complete(job_id) {
            Ok(job) => {
                self.metrics.inc_completed();
                info!(worker = self.id, job_id = %job_id, attempt = job.attempts, "job completed");
            }
            Err(err) => {
                error!(worker = self.id, job_id = %job_id, %err, "failed to record job completion");
            }
        }
    }

    fn finish_failed(&self, job_id: &Uuid, reason: &str) {
        match self.registry.fail(job_id, reason) {
            Ok(_) => self.metrics.inc_failed(),
            Err(err) => {
                error!(worker = self.id, job_id = %job_id, %err, "failed to record job failure");
            }
        }
    }
}
