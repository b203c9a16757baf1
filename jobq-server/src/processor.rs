//! The seam between the worker loop and actual job execution.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use jobq_common::registry::Job;

/// Terminal failure of a single processing attempt.
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct ProcessError {
    pub reason: String,
}

impl ProcessError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Executes one attempt of a claimed job.
///
/// Implementations must be cancel-safe: the worker drops the in-flight
/// future when shutdown fires mid-attempt.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &Job) -> Result<(), ProcessError>;
}

/// Placeholder executor that models work as a fixed delay.
pub struct SleepProcessor {
    duration: Duration,
}

impl SleepProcessor {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Processor for SleepProcessor {
    async fn process(&self, _job: &Job) -> Result<(), ProcessError> {
        tokio::time::sleep(self.duration).await;

        Ok(())
    }
}
