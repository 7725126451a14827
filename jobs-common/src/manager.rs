use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::JobError;
use crate::job::{CapturedContext, Job, JobStatus};
use crate::retry::RetryPolicy;
use crate::store::{ClaimOutcome, JobStore, StoreError};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("job {0} was not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job {0} is already in a terminal state")]
    AlreadyTerminal(Uuid),
    #[error("job {0} cannot be canceled from its current state")]
    NotCancelable(Uuid),
}

impl From<ManagerError> for JobError {
    fn from(error: ManagerError) -> Self {
        match error {
            ManagerError::NotFound(id) => JobError::not_found(id),
            ManagerError::Store(StoreError::NotFound(id)) => JobError::not_found(id),
            ManagerError::Store(StoreError::ConcurrencyConflict(_)) => {
                JobError::new(crate::error::ErrorCode::ConcurrencyConflict, error.to_string())
            }
            ManagerError::Store(StoreError::InvalidJob(_)) => {
                JobError::new(crate::error::ErrorCode::InvalidJob, error.to_string())
            }
            ManagerError::Store(StoreError::InvalidJobId(_)) => {
                JobError::new(crate::error::ErrorCode::InvalidJobId, error.to_string())
            }
            ManagerError::Store(StoreError::DuplicateJob(_)) => {
                JobError::new(crate::error::ErrorCode::DuplicateJob, error.to_string())
            }
            ManagerError::Store(_) => {
                JobError::new(crate::error::ErrorCode::StoreError, error.to_string())
            }
            ManagerError::AlreadyTerminal(_) | ManagerError::NotCancelable(_) => {
                JobError::new(crate::error::ErrorCode::InvalidJob, error.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub default_max_retries: u32,
    pub retry_policy: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Owns the job lifecycle: submission, claiming, and finalization. The sole
/// authorized mutator of a job's state, per the submit/worker/recovery
/// mutation discipline.
pub struct JobManager<S: JobStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: ManagerConfig,
}

impl<S: JobStore> JobManager<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: ManagerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a job in `Queued`, or, if `requested_id` names a job that
    /// already exists, return that job unchanged — the `Async-Job-Id`
    /// idempotency path.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        payload: Vec<u8>,
        context: CapturedContext,
        requested_id: Option<Uuid>,
    ) -> Result<Job, ManagerError> {
        if let Some(id) = requested_id {
            match self.store.get_by_id(id).await {
                Ok(existing) => return Ok(existing),
                Err(StoreError::NotFound(_)) => {}
                Err(other) => return Err(other.into()),
            }
        }

        let now = self.clock.now();
        let job = match requested_id {
            Some(id) => Job::with_id(
                id,
                name,
                payload,
                self.config.default_max_retries,
                context,
                now,
            ),
            None => Job::new(name, payload, self.config.default_max_retries, context, now),
        };

        // Two submitters racing on the same requested_id both pass the
        // get_by_id check above and both call create(); the store's atomic
        // check-then-insert lets exactly one through, and the loser fetches
        // the winner's job so both callers still observe a single state.
        match self.store.create(job).await {
            Ok(created) => Ok(created),
            Err(StoreError::DuplicateJob(id)) if requested_id == Some(id) => {
                self.store.get_by_id(id).await.map_err(Into::into)
            }
            Err(other) => Err(other.into()),
        }
    }

    pub async fn claim_next_available_job(
        &self,
        worker_id: Uuid,
    ) -> Result<ClaimOutcome, ManagerError> {
        let now = self.clock.now();
        Ok(self.store.claim_next_for_worker(worker_id, now).await?)
    }

    pub async fn get_job_by_id(&self, id: Uuid) -> Result<Job, ManagerError> {
        self.store
            .get_by_id(id)
            .await
            .map_err(|error| match error {
                StoreError::NotFound(id) => ManagerError::NotFound(id),
                other => ManagerError::Store(other),
            })
    }

    pub async fn process_job_success(
        &self,
        job_id: Uuid,
        result: Vec<u8>,
    ) -> Result<Job, ManagerError> {
        let mut job = self.get_job_by_id(job_id).await?;
        if job.status.is_terminal() {
            return Err(ManagerError::AlreadyTerminal(job_id));
        }

        let now = self.clock.now();
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.error = None;
        job.completed_at = Some(now);
        job.last_updated_at = now;

        Ok(self.store.update(job).await?)
    }

    pub async fn process_job_failure(
        &self,
        job_id: Uuid,
        error: JobError,
    ) -> Result<Job, ManagerError> {
        let mut job = self.get_job_by_id(job_id).await?;
        if job.status.is_terminal() {
            return Err(ManagerError::AlreadyTerminal(job_id));
        }

        let now = self.clock.now();
        job.error = Some(error);
        job.last_updated_at = now;
        job.worker_id = None;

        if job.retry_count < job.max_retries {
            job.retry_count += 1;
            let delay = self.config.retry_policy.delay_for_attempt(job.retry_count);
            job.status = JobStatus::Scheduled;
            job.retry_delay_until = Some(now + delay);
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
        }

        Ok(self.store.update(job).await?)
    }

    /// Not part of spec.md's core; the spec's Open Questions explicitly
    /// invite a `Cancel(id)` terminal transition. Valid only while the job
    /// has no owner yet.
    pub async fn cancel(&self, id: Uuid) -> Result<Job, ManagerError> {
        let mut job = self.get_job_by_id(id).await?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Scheduled) {
            return Err(ManagerError::NotCancelable(id));
        }

        let now = self.clock.now();
        job.status = JobStatus::Canceled;
        job.completed_at = Some(now);
        job.last_updated_at = now;

        Ok(self.store.update(job).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorCode;
    use crate::store::memory::InMemoryStore;

    fn manager(clock: Arc<ManualClock>) -> JobManager<InMemoryStore> {
        JobManager::new(Arc::new(InMemoryStore::new()), clock, ManagerConfig::default())
    }

    #[tokio::test]
    async fn submit_creates_a_queued_job() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = manager(clock);

        let job = manager
            .submit("echo", b"{}".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn submit_with_same_requested_id_is_idempotent() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = manager(clock);
        let id = Uuid::now_v7();

        let first = manager
            .submit("echo", b"{\"a\":1}".to_vec(), CapturedContext::default(), Some(id))
            .await
            .unwrap();
        let second = manager
            .submit(
                "echo",
                b"{\"a\":2}".to_vec(),
                CapturedContext::default(),
                Some(id),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.payload, second.payload);
    }

    #[tokio::test]
    async fn submit_recovers_the_winner_when_create_loses_a_duplicate_id_race() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = manager(clock);
        let id = Uuid::now_v7();

        // A second submitter landing after the winner's job already exists
        // must observe the winner's state rather than its own, whether it
        // is caught by the get_by_id pre-check or by create()'s duplicate
        // rejection.
        let winner = Job::with_id(
            id,
            "echo",
            b"{\"winner\":true}".to_vec(),
            3,
            CapturedContext::default(),
            chrono::Utc::now(),
        );
        manager.store().create(winner.clone()).await.unwrap();

        let result = manager
            .submit("echo", b"{\"winner\":false}".to_vec(), CapturedContext::default(), Some(id))
            .await
            .unwrap();

        assert_eq!(result.id, winner.id);
        assert_eq!(result.payload, winner.payload);
    }

    #[tokio::test]
    async fn failure_schedules_retry_until_budget_exhausted() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = manager(clock);

        let job = manager
            .submit("echo", b"{}".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();

        let claimed = match manager.claim_next_available_job(Uuid::now_v7()).await.unwrap() {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::NoJob => panic!("expected a job"),
        };
        assert_eq!(claimed.id, job.id);

        let failed = manager
            .process_job_failure(job.id, JobError::new(ErrorCode::Handler, "boom"))
            .await
            .unwrap();

        assert_eq!(failed.status, JobStatus::Scheduled);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.retry_delay_until.is_some());
    }

    #[tokio::test]
    async fn failure_is_permanent_once_retries_are_exhausted() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = JobManager::new(
            Arc::new(InMemoryStore::new()),
            clock,
            ManagerConfig {
                default_max_retries: 0,
                ..ManagerConfig::default()
            },
        );

        let job = manager
            .submit("echo", b"{}".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();

        let failed = manager
            .process_job_failure(job.id, JobError::new(ErrorCode::Handler, "boom"))
            .await
            .unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.retry_count, 0);
    }

    #[tokio::test]
    async fn success_after_terminal_is_rejected() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = manager(clock);

        let job = manager
            .submit("echo", b"{}".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();
        manager
            .process_job_success(job.id, b"{}".to_vec())
            .await
            .unwrap();

        let result = manager.process_job_success(job.id, b"{}".to_vec()).await;
        assert!(matches!(result, Err(ManagerError::AlreadyTerminal(_))));
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_a_job_is_claimed() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = manager(clock);

        let job = manager
            .submit("echo", b"{}".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();
        manager
            .claim_next_available_job(Uuid::now_v7())
            .await
            .unwrap();

        let result = manager.cancel(job.id).await;
        assert!(matches!(result, Err(ManagerError::NotCancelable(_))));
    }
}
