use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::executor::execute_handler;
use crate::job::Job;
use crate::manager::JobManager;
use crate::registry::HandlerRegistry;
use crate::store::JobStore;

/// Runs a single claimed job to completion: invokes its handler and
/// finalizes the result through the manager. Every path ends in either
/// `process_job_success` or `process_job_failure` — the processor itself
/// never panics out, and a handler panic is caught by [`execute_handler`]
/// well before it reaches here.
pub struct JobProcessor<S: JobStore> {
    registry: Arc<HandlerRegistry>,
    manager: Arc<JobManager<S>>,
}

impl<S: JobStore> JobProcessor<S> {
    pub fn new(registry: Arc<HandlerRegistry>, manager: Arc<JobManager<S>>) -> Self {
        Self { registry, manager }
    }

    pub async fn process(&self, job: Job, cancel: CancellationToken) {
        let job_id = job.id;
        let outcome = execute_handler(&self.registry, &job, cancel).await;

        let finalized = match outcome {
            Ok(bytes) => self.manager.process_job_success(job_id, bytes).await,
            Err(error) => self.manager.process_job_failure(job_id, error).await,
        };

        // Finalization failing (e.g. the store is unreachable) leaves the job
        // claimed and InProgress; recovery reclaims it later. Nothing further
        // to do from here — retrying inline risks a duplicate side effect.
        if let Err(error) = finalized {
            tracing::error!(job_id = %job_id, %error, "failed to finalize job after processing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::CapturedContext;
    use crate::job::JobStatus;
    use crate::manager::ManagerConfig;
    use crate::registry::{AsyncContext, NoBody};
    use crate::serializer::JsonSerializer;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn manager() -> Arc<JobManager<InMemoryStore>> {
        Arc::new(JobManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            ManagerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn successful_handler_completes_the_job() {
        let manager = manager();
        let registry = Arc::new(
            HandlerRegistry::builder()
                .register(
                    "ping",
                    Arc::new(JsonSerializer),
                    |_context: AsyncContext<NoBody>, _cancel| async move { Ok("pong".to_string()) },
                )
                .build(),
        );
        let processor = JobProcessor::new(registry, manager.clone());

        let submitted = manager
            .submit("ping", b"null".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();
        let claimed = match manager.claim_next_available_job(Uuid::now_v7()).await.unwrap() {
            crate::store::ClaimOutcome::Claimed(job) => job,
            crate::store::ClaimOutcome::NoJob => panic!("expected a job"),
        };
        assert_eq!(claimed.id, submitted.id);

        processor.process(claimed, CancellationToken::new()).await;

        let finished = manager.get_job_by_id(submitted.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.result, Some(br#""pong""#.to_vec()));
    }

    #[tokio::test]
    async fn missing_handler_schedules_a_retry() {
        let manager = manager();
        let registry = Arc::new(HandlerRegistry::builder().build());
        let processor = JobProcessor::new(registry, manager.clone());

        let submitted = manager
            .submit("unregistered", b"null".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();
        let claimed = match manager.claim_next_available_job(Uuid::now_v7()).await.unwrap() {
            crate::store::ClaimOutcome::Claimed(job) => job,
            crate::store::ClaimOutcome::NoJob => panic!("expected a job"),
        };

        processor.process(claimed, CancellationToken::new()).await;

        let finished = manager.get_job_by_id(submitted.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Scheduled);
        assert_eq!(finished.retry_count, 1);
    }
}
