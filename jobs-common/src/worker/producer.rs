use std::sync::Arc;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::job::Job;
use crate::manager::JobManager;
use crate::store::JobStore;
use crate::worker::claim::{claim_and_enqueue, next_delay, ClaimEnqueueOutcome};

/// Runs the claim loop until `cancel` fires or the channel closes. A single
/// cooperative task: it never runs more than one claim at a time, leaning on
/// the consumer's semaphore for concurrency instead. Each iteration claims up
/// to `config.batch_size` jobs before sleeping, so that setting governs how
/// many jobs a single polling interval can pull off the queue.
pub async fn run_producer<S: JobStore>(
    manager: Arc<JobManager<S>>,
    worker_id: Uuid,
    sender: Sender<Job>,
    config: WorkerConfig,
    cancel: CancellationToken,
) {
    'producer: loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut outcome = ClaimEnqueueOutcome::NoJobFound;
        for _ in 0..config.batch_size.max(1) {
            if cancel.is_cancelled() {
                break 'producer;
            }

            outcome = claim_and_enqueue(&manager, worker_id, &sender).await;
            if outcome == ClaimEnqueueOutcome::ChannelClosed {
                tracing::info!(%worker_id, "producer channel closed, stopping");
                break 'producer;
            }
            if outcome != ClaimEnqueueOutcome::JobSuccessfullyEnqueued {
                break;
            }
        }

        let delay = next_delay(outcome, &config);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    drop(sender);
    tracing::info!(%worker_id, "producer loop exiting");
}
