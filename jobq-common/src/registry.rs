//! # Registry
//!
//! An in-memory job store guarded by a reader/writer lock.
//!
//! The registry is the only component allowed to mutate a job. Every
//! mutation happens under the exclusive lock and moves the job along the
//! lifecycle graph: `Pending -> Processing -> {Completed, Failed}`, with
//! `Failed -> Pending` reserved for the sweeper. All jobs handed out to
//! callers are copies; mutating them has no effect on stored state.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use uuid::Uuid;

/// Enumeration of errors for operations on the registry.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {0} does not exist")]
    NotFound(Uuid),
    #[error("job {0} is already registered")]
    DuplicateId(Uuid),
    #[error("job {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Enumeration of possible statuses for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// A job that is waiting to be picked up by a worker.
    Pending,
    /// A job that is owned by exactly one worker.
    Processing,
    /// A job that was successfully completed by a worker. Terminal.
    Completed,
    /// A job whose last attempt failed. Terminal until the sweeper
    /// returns it to `Pending`.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A job submitted for background processing.
///
/// The payload is kept as the raw JSON bytes received at admission so that
/// listing jobs returns exactly what the client sent (no numeric precision
/// loss, no field reordering).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// A unique id identifying a job.
    pub id: Uuid,
    /// A free-form, non-empty label. Opaque to the queue.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Arbitrary job parameters, stored verbatim.
    pub payload: Box<RawValue>,
    /// The current status of the job.
    pub status: JobStatus,
    /// A number of processing attempts that have started. Never decreases.
    pub attempts: u32,
    /// The reason of the last failed attempt. Cleared when a new attempt
    /// begins.
    pub last_error: Option<String>,
    /// A datetime corresponding to when the job was created.
    pub created_at: DateTime<Utc>,
    /// A datetime corresponding to the last status mutation.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a new `Pending` job from admission input.
    pub fn new(job_type: String, payload: Box<RawValue>) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            job_type,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// The authoritative store of all jobs.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock can only be left behind by a panicking reader or a
    // writer that already applied its full transition, so the map is safe
    // to keep using.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new job. The job keeps whatever status it was built
    /// with; admission always inserts `Pending` jobs.
    pub fn insert(&self, job: Job) -> RegistryResult<()> {
        let mut jobs = self.write();

        if jobs.contains_key(&job.id) {
            return Err(RegistryError::DuplicateId(job.id));
        }

        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "job registered");
        jobs.insert(job.id, job);

        Ok(())
    }

    /// Remove a job. Only used to roll back an admission whose enqueue was
    /// rejected.
    pub fn delete(&self, id: &Uuid) -> RegistryResult<Job> {
        let mut jobs = self.write();

        match jobs.remove(id) {
            Some(job) => {
                tracing::debug!(job_id = %id, "job removed");
                Ok(job)
            }
            None => Err(RegistryError::NotFound(*id)),
        }
    }

    /// Return a copy of a single job.
    pub fn get(&self, id: &Uuid) -> RegistryResult<Job> {
        self.read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound(*id))
    }

    /// Return a snapshot of all jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        jobs
    }

    /// Atomically take ownership of a `Pending` job.
    ///
    /// Under the exclusive lock: moves the job to `Processing`, increments
    /// its attempt counter, clears the previous failure reason and returns
    /// the updated copy. Returns `None` when the job does not exist or is
    /// no longer `Pending`, meaning the caller lost the race and must not
    /// touch the job. This is the only entry into `Processing`.
    pub fn claim(&self, id: &Uuid) -> Option<Job> {
        let mut jobs = self.write();

        let job = jobs.get_mut(id)?;
        if job.status != JobStatus::Pending {
            return None;
        }

        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.last_error = None;
        job.updated_at = Utc::now();

        tracing::debug!(job_id = %id, attempt = job.attempts, "job claimed");
        Some(job.clone())
    }

    /// Transition a `Processing` job to `Completed`.
    pub fn complete(&self, id: &Uuid) -> RegistryResult<Job> {
        self.finish(id, JobStatus::Completed, None)
    }

    /// Transition a `Processing` job to `Failed`, recording the reason.
    pub fn fail(&self, id: &Uuid, error: &str) -> RegistryResult<Job> {
        self.finish(id, JobStatus::Failed, Some(error.to_owned()))
    }

    fn finish(
        &self,
        id: &Uuid,
        terminal: JobStatus,
        error: Option<String>,
    ) -> RegistryResult<Job> {
        let mut jobs = self.write();

        let job = jobs.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        if job.status != JobStatus::Processing {
            return Err(RegistryError::InvalidTransition {
                id: *id,
                from: job.status,
                to: terminal,
            });
        }

        job.status = terminal;
        job.last_error = error;
        job.updated_at = Utc::now();

        tracing::debug!(job_id = %id, status = %terminal, "job finished");
        Ok(job.clone())
    }

    /// Return a `Failed` job to `Pending` so it can be claimed again. The
    /// failure reason is kept until the next claim clears it.
    pub fn mark_pending(&self, id: &Uuid) -> RegistryResult<Job> {
        let mut jobs = self.write();

        let job = jobs.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        if job.status != JobStatus::Failed {
            return Err(RegistryError::InvalidTransition {
                id: *id,
                from: job.status,
                to: JobStatus::Pending,
            });
        }

        job.status = JobStatus::Pending;
        job.updated_at = Utc::now();

        tracing::debug!(job_id = %id, attempt = job.attempts, "job returned to pending");
        Ok(job.clone())
    }
}
