use jobs_common::error::JobOutcome;
use jobs_common::registry::AsyncContext;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Echoes the submitted payload back unchanged. Registered under the job
/// name `"echo"`; takes an arbitrary JSON value rather than a fixed schema
/// so it exercises the happy path round-trip regardless of payload shape.
pub async fn echo(context: AsyncContext<Value>, _cancel: CancellationToken) -> JobOutcome<Value> {
    Ok(context.request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobs_common::clock::ManualClock;
    use jobs_common::job::{CapturedContext, JobStatus};
    use jobs_common::manager::{JobManager, ManagerConfig};
    use jobs_common::processor::JobProcessor;
    use jobs_common::registry::HandlerRegistry;
    use jobs_common::serializer::JsonSerializer;
    use jobs_common::store::memory::InMemoryStore;
    use jobs_common::store::ClaimOutcome;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn echoes_an_arbitrary_json_payload_end_to_end() {
        let store = Arc::new(InMemoryStore::new());
        let manager = Arc::new(JobManager::new(
            store,
            Arc::new(ManualClock::new(Utc::now())),
            ManagerConfig::default(),
        ));
        let registry = Arc::new(
            HandlerRegistry::builder()
                .register("echo", Arc::new(JsonSerializer), echo)
                .build(),
        );
        let processor = JobProcessor::new(registry, manager.clone());

        let submitted = manager
            .submit(
                "echo",
                br#"{"x":1}"#.to_vec(),
                CapturedContext::default(),
                None,
            )
            .await
            .unwrap();
        let claimed = match manager.claim_next_available_job(Uuid::now_v7()).await.unwrap() {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::NoJob => panic!("expected a job"),
        };

        processor.process(claimed, CancellationToken::new()).await;

        let finished = manager.get_job_by_id(submitted.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.result, Some(br#"{"x":1}"#.to_vec()));
    }
}
