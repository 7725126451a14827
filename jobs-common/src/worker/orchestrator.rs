use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{RecoveryConfig, WorkerConfig};
use crate::manager::JobManager;
use crate::processor::JobProcessor;
use crate::store::JobStore;
use crate::worker::consumer::run_consumer;
use crate::worker::producer::run_producer;
use crate::worker::recovery::run_recovery;

/// Assembles the producer, consumer, and (when the store supports it)
/// recovery loops into one running worker, and tears them all down together
/// on cancellation.
pub struct Orchestrator<S: JobStore> {
    manager: Arc<JobManager<S>>,
    store: Arc<S>,
    processor: Arc<JobProcessor<S>>,
    clock: Arc<dyn Clock>,
    worker_id: Uuid,
    worker_config: WorkerConfig,
    recovery_config: RecoveryConfig,
}

impl<S: JobStore + 'static> Orchestrator<S> {
    pub fn new(
        manager: Arc<JobManager<S>>,
        store: Arc<S>,
        processor: Arc<JobProcessor<S>>,
        clock: Arc<dyn Clock>,
        worker_id: Uuid,
        worker_config: WorkerConfig,
        recovery_config: RecoveryConfig,
    ) -> Self {
        Self {
            manager,
            store,
            processor,
            clock,
            worker_id,
            worker_config,
            recovery_config,
        }
    }

    /// Runs until `cancel` fires, then waits for every loop to exit.
    pub async fn run(self, cancel: CancellationToken) {
        let (sender, receiver) = tokio::sync::mpsc::channel(self.worker_config.maximum_queue_size);

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_producer(
            self.manager.clone(),
            self.worker_id,
            sender,
            self.worker_config.clone(),
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(run_consumer(
            receiver,
            self.processor.clone(),
            self.worker_config.clone(),
            cancel.clone(),
        )));

        if self.store.supports_recovery() && self.recovery_config.enable_distributed_job_recovery {
            tasks.push(tokio::spawn(run_recovery(
                self.store.clone(),
                self.recovery_config.clone(),
                self.clock.clone(),
                cancel.clone(),
            )));
        }

        for task in tasks {
            if let Err(error) = task.await {
                tracing::error!(%error, "worker task panicked");
            }
        }

        tracing::info!("orchestrator shut down cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::{CapturedContext, JobStatus};
    use crate::manager::ManagerConfig;
    use crate::registry::{AsyncContext, HandlerRegistry, NoBody};
    use crate::serializer::JsonSerializer;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use std::time::Duration;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            worker_id: None,
            maximum_concurrency: 2,
            polling_interval_ms: crate::config::EnvMsDuration(Duration::from_millis(10)),
            job_polling_interval_ms: None,
            job_timeout_ms: crate::config::EnvMsDuration(Duration::from_millis(1_800_000)),
            batch_size: 1,
            maximum_queue_size: 10,
            error_delay_seconds: 1,
            shutdown_timeout_seconds: 1,
        }
    }

    fn recovery_config() -> RecoveryConfig {
        RecoveryConfig {
            enable_distributed_job_recovery: true,
            job_timeout_minutes: 30,
            recovery_check_interval_seconds: 60,
            maximum_retries: 3,
        }
    }

    #[tokio::test]
    async fn runs_a_submitted_job_to_completion_then_shuts_down() {
        let store = Arc::new(InMemoryStore::new());
        let manager = Arc::new(JobManager::new(
            store.clone(),
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

        let orchestrator = Orchestrator::new(
            manager.clone(),
            store,
            processor,
            Arc::new(ManualClock::new(Utc::now())),
            Uuid::now_v7(),
            worker_config(),
            recovery_config(),
        );

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let handle = tokio::spawn(async move { orchestrator.run(child).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let finished = manager.get_job_by_id(submitted.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
    }
}
