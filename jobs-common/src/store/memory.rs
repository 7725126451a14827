use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::job::{Job, JobStatus};

use super::{validate_new_job, ClaimOutcome, JobStore, StoreError};

/// Number of times `update`/claim will retry their optimistic
/// compare-and-swap before giving up and reporting a conflict. A single
/// process rarely contends this hard; it exists as a backstop against
/// pathological scheduling rather than expected-case behavior.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// A single-process job store backed by a concurrent hash map.
///
/// Mutations use an optimistic compare-and-swap loop keyed on
/// [`Job::version`] rather than a lock held across the whole operation,
/// matching the rest of the crate's preference for lock-free coordination
/// over long-held mutexes.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cas_update<F>(&self, id: Uuid, mut mutate: F) -> Result<Job, StoreError>
    where
        F: FnMut(&mut Job),
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .jobs
                .get(&id)
                .map(|entry| entry.value().clone())
                .ok_or(StoreError::NotFound(id))?;

            let expected_version = current.version;
            let mut candidate = current;
            mutate(&mut candidate);
            candidate.version = expected_version + 1;

            let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            if entry.version != expected_version {
                continue;
            }
            *entry = candidate.clone();
            return Ok(candidate);
        }
        Err(StoreError::ConcurrencyConflict(id))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        validate_new_job(&job)?;
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateJob(job.id)),
            Entry::Vacant(entry) => {
                entry.insert(job.clone());
                Ok(job)
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Job, StoreError> {
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(&self, job: Job) -> Result<Job, StoreError> {
        let id = job.id;
        let expected_version = job.version;
        let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.version != expected_version {
            return Err(StoreError::ConcurrencyConflict(id));
        }
        let mut updated = job;
        updated.version = expected_version + 1;
        *entry = updated.clone();
        Ok(updated)
    }

    async fn claim_next_for_worker(
        &self,
        worker_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut candidates: Vec<Job> = self
            .jobs
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|job| job.is_claimable(now))
            .collect();
        candidates.sort_by_key(|job| job.created_at);

        for candidate in candidates {
            let id = candidate.id;
            let expected_version = candidate.version;

            let claimed = self.cas_update(id, move |job| {
                job.status = JobStatus::InProgress;
                job.worker_id = Some(worker_id);
                job.started_at = Some(now);
                job.last_updated_at = now;
            });

            match claimed {
                Ok(job) if job.version == expected_version + 1 => {
                    return Ok(ClaimOutcome::Claimed(job));
                }
                Ok(_) | Err(StoreError::ConcurrencyConflict(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(ClaimOutcome::NoJob)
    }

    fn supports_recovery(&self) -> bool {
        false
    }

    async fn recover_stuck_jobs(
        &self,
        _stuck_after: chrono::Duration,
        _now: DateTime<Utc>,
        _default_max_retries: u32,
    ) -> Result<Vec<Job>, StoreError> {
        Err(StoreError::RecoveryUnsupported)
    }
}
