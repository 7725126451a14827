pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::job::Job;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("job {0} was not found")]
    NotFound(Uuid),
    #[error("job {0} was concurrently modified by another writer")]
    ConcurrencyConflict(Uuid),
    #[error("this store does not support stuck-job recovery")]
    RecoveryUnsupported,
    #[error("underlying store is unavailable: {0}")]
    Unavailable(String),
    #[error("job is invalid: {0}")]
    InvalidJob(String),
    #[error("job id {0} is invalid")]
    InvalidJobId(Uuid),
    #[error("job {0} already exists")]
    DuplicateJob(Uuid),
}

/// Rejects a job a store is about to `create()`: a nil id or an empty name
/// can never have been produced by [`crate::job::Job::new`]/`with_id`, so
/// seeing one here means a caller constructed a `Job` by hand.
pub(crate) fn validate_new_job(job: &Job) -> Result<(), StoreError> {
    if job.id.is_nil() {
        return Err(StoreError::InvalidJobId(job.id));
    }
    if job.name.trim().is_empty() {
        return Err(StoreError::InvalidJob("name must not be empty".into()));
    }
    Ok(())
}

/// The outcome of attempting to claim the next eligible job for a worker.
pub enum ClaimOutcome {
    Claimed(Job),
    NoJob,
}

/// Storage abstraction the job manager is built against. Implementations own
/// durability and the at-most-one-worker claiming guarantee; everything
/// above this trait is storage-agnostic.
///
/// `supports_recovery`/`recover_stuck_jobs` exist because only a store
/// shared across processes (the distributed backend) can observe a worker
/// that died mid-job; a single-process in-memory store has no "other
/// process" to recover from and says so honestly rather than pretending.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Rejects a nil id or empty name with
    /// `InvalidJobId`/`InvalidJob`, and rejects an id that already exists
    /// with `DuplicateJob` — the check and the insert happen atomically, so
    /// two concurrent `create()` calls for the same id never both succeed.
    async fn create(&self, job: Job) -> Result<Job, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Job, StoreError>;

    /// Replace the stored job with `job`, failing if `job.version` no
    /// longer matches what is currently persisted.
    async fn update(&self, job: Job) -> Result<Job, StoreError>;

    /// Atomically claim the oldest eligible job for `worker_id`, transition
    /// it to `InProgress`, and return it.
    async fn claim_next_for_worker(
        &self,
        worker_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError>;

    fn supports_recovery(&self) -> bool;

    /// Find jobs stuck in `InProgress` past `stuck_after`. A job with
    /// retries remaining is returned to `Scheduled` with an immediate
    /// `retry_delay_until` and its retry count incremented; a job that has
    /// exhausted its budget is marked `Failed` instead. `default_max_retries`
    /// is used only as a fallback for a job hash missing its own
    /// `max_retries` field — every job created by this crate always carries
    /// one, so in practice the per-job value governs. Returns every job the
    /// pass touched (rescheduled or failed).
    async fn recover_stuck_jobs(
        &self,
        stuck_after: chrono::Duration,
        now: DateTime<Utc>,
        default_max_retries: u32,
    ) -> Result<Vec<Job>, StoreError>;
}
