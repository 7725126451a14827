use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::job::Job;
use crate::processor::JobProcessor;
use crate::store::JobStore;

/// Reads claimed jobs off `receiver` and runs each through `processor`,
/// bounding concurrency with a semaphore sized to `maximum_concurrency`.
///
/// On cancellation, stops accepting new jobs and waits up to
/// `shutdown_timeout_seconds` for outstanding children before returning.
pub async fn run_consumer<S: JobStore + 'static>(
    mut receiver: Receiver<Job>,
    processor: Arc<JobProcessor<S>>,
    config: WorkerConfig,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(config.maximum_concurrency));
    let mut children = Vec::new();

    loop {
        let report_saturation = || {
            let in_use = config.maximum_concurrency - semaphore.available_permits();
            metrics::gauge!("worker_saturation_percent")
                .set(in_use as f64 / config.maximum_concurrency as f64 * 100.0);
        };
        report_saturation();

        let job = tokio::select! {
            job = receiver.recv() => job,
            _ = cancel.cancelled() => None,
        };

        let Some(job) = job else { break };

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };

        let processor = processor.clone();
        let job_cancel = cancel.clone();
        children.push(tokio::spawn(async move {
            let _permit = permit;
            processor.process(job, job_cancel).await;
        }));

        children.retain(|handle| !handle.is_finished());
    }

    let drain = async {
        for handle in children {
            if let Err(error) = handle.await {
                tracing::error!(%error, "job task panicked");
            }
        }
    };

    if tokio::time::timeout(config.shutdown_timeout(), drain).await.is_err() {
        tracing::warn!("consumer shutdown timed out waiting for in-flight jobs");
    }

    tracing::info!("consumer loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::{CapturedContext, JobStatus};
    use crate::manager::{JobManager, ManagerConfig};
    use crate::registry::{AsyncContext, HandlerRegistry, NoBody};
    use crate::serializer::JsonSerializer;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use std::time::Duration;

    fn config() -> WorkerConfig {
        WorkerConfig {
            worker_id: None,
            maximum_concurrency: 2,
            polling_interval_ms: crate::config::EnvMsDuration(Duration::from_millis(10)),
            job_polling_interval_ms: None,
            job_timeout_ms: crate::config::EnvMsDuration(Duration::from_millis(1_800_000)),
            batch_size: 1,
            maximum_queue_size: 10,
            error_delay_seconds: 5,
            shutdown_timeout_seconds: 1,
        }
    }

    #[tokio::test]
    async fn processes_jobs_sent_on_the_channel() {
        let manager = Arc::new(JobManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            ManagerConfig::default(),
        ));
        let registry = Arc::new(
            HandlerRegistry::builder()
                .register(
                    "ping",
                    Arc::new(JsonSerializer),
                    |_context: AsyncContext<NoBody>, _cancel| async move { Ok("pong".to_string()) },
                )
                .build(),
        );
        let processor = Arc::new(JobProcessor::new(registry, manager.clone()));

        let submitted = manager
            .submit("ping", b"null".to_vec(), CapturedContext::default(), None)
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::mpsc::channel(10);
        tx.send(submitted.clone()).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        run_consumer(rx, processor, config(), cancel).await;

        let finished = manager.get_job_by_id(submitted.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
    }
}
