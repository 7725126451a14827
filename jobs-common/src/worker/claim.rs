use std::time::Duration;

use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::job::Job;
use crate::manager::JobManager;
use crate::store::{ClaimOutcome, JobStore};

const CHANNEL_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DELAY_MS: u64 = 30_000;

/// The five possible outcomes of a single producer iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEnqueueOutcome {
    JobSuccessfullyEnqueued,
    NoJobFound,
    FailedToEnqueue,
    ErrorOccurred,
    /// The receiving end of the channel is gone. Distinct from
    /// `ErrorOccurred` because the producer loop must terminate here rather
    /// than retry — there is no consumer left to hand jobs to.
    ChannelClosed,
}

/// Claim the next eligible job for `worker_id` and push it onto `sender`.
///
/// The send is attempted non-blocking first; if the channel is momentarily
/// full, a blocking send is retried for up to 5 seconds before giving up.
pub async fn claim_and_enqueue<S: JobStore>(
    manager: &JobManager<S>,
    worker_id: Uuid,
    sender: &Sender<Job>,
) -> ClaimEnqueueOutcome {
    let claimed = match manager.claim_next_available_job(worker_id).await {
        Ok(ClaimOutcome::Claimed(job)) => job,
        Ok(ClaimOutcome::NoJob) => return ClaimEnqueueOutcome::NoJobFound,
        Err(error) => {
            tracing::error!(%error, "failed to claim next available job");
            return ClaimEnqueueOutcome::ErrorOccurred;
        }
    };

    match sender.try_send(claimed) {
        Ok(()) => ClaimEnqueueOutcome::JobSuccessfullyEnqueued,
        Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => ClaimEnqueueOutcome::ChannelClosed,
        Err(tokio::sync::mpsc::error::TrySendError::Full(job)) => {
            match tokio::time::timeout(CHANNEL_SEND_TIMEOUT, sender.send(job)).await {
                Ok(Ok(())) => ClaimEnqueueOutcome::JobSuccessfullyEnqueued,
                Ok(Err(_)) => ClaimEnqueueOutcome::ChannelClosed,
                Err(_elapsed) => ClaimEnqueueOutcome::FailedToEnqueue,
            }
        }
    }
}

/// Map an outcome to the delay before the next producer iteration.
pub fn next_delay(outcome: ClaimEnqueueOutcome, config: &WorkerConfig) -> Duration {
    let polling_interval = config.effective_polling_interval();
    match outcome {
        ClaimEnqueueOutcome::JobSuccessfullyEnqueued => polling_interval,
        ClaimEnqueueOutcome::NoJobFound => {
            std::cmp::min(polling_interval * 3, Duration::from_millis(MAX_DELAY_MS))
        }
        ClaimEnqueueOutcome::FailedToEnqueue => polling_interval * 2,
        ClaimEnqueueOutcome::ErrorOccurred => config.error_delay(),
        // The producer breaks its loop on this outcome before it would ever
        // sleep; the delay is never actually waited on.
        ClaimEnqueueOutcome::ChannelClosed => config.error_delay(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::CapturedContext;
    use crate::manager::ManagerConfig;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn config() -> WorkerConfig {
        WorkerConfig {
            worker_id: None,
            maximum_concurrency: 10,
            polling_interval_ms: crate::config::EnvMsDuration(Duration::from_millis(500)),
            job_polling_interval_ms: None,
            job_timeout_ms: crate::config::EnvMsDuration(Duration::from_millis(1_800_000)),
            batch_size: 1,
            maximum_queue_size: 10,
            error_delay_seconds: 5,
            shutdown_timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn claims_and_enqueues_an_available_job() {
        let manager = JobManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            ManagerConfig::default(),
        );
        manager
            .submit("echo", b"{}".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let outcome = claim_and_enqueue(&manager, Uuid::now_v7(), &tx).await;

        assert_eq!(outcome, ClaimEnqueueOutcome::JobSuccessfullyEnqueued);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn empty_queue_reports_no_job_found() {
        let manager = JobManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            ManagerConfig::default(),
        );
        let (tx, _rx) = tokio::sync::mpsc::channel(10);

        let outcome = claim_and_enqueue(&manager, Uuid::now_v7(), &tx).await;
        assert_eq!(outcome, ClaimEnqueueOutcome::NoJobFound);
    }

    #[test]
    fn delay_table_matches_outcome() {
        let config = config();
        assert_eq!(
            next_delay(ClaimEnqueueOutcome::JobSuccessfullyEnqueued, &config),
            Duration::from_millis(500)
        );
        assert_eq!(
            next_delay(ClaimEnqueueOutcome::NoJobFound, &config),
            Duration::from_millis(1500)
        );
        assert_eq!(
            next_delay(ClaimEnqueueOutcome::FailedToEnqueue, &config),
            Duration::from_millis(1000)
        );
        assert_eq!(
            next_delay(ClaimEnqueueOutcome::ErrorOccurred, &config),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn no_job_found_delay_is_capped_at_max_delay_ms() {
        let mut config = config();
        config.polling_interval_ms = crate::config::EnvMsDuration(Duration::from_millis(20_000));
        assert_eq!(
            next_delay(ClaimEnqueueOutcome::NoJobFound, &config),
            Duration::from_millis(MAX_DELAY_MS)
        );
    }
}
