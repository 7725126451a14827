//! Claims and runs jobs from a shared queue, dispatching each to its
//! registered handler.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use health::HealthRegistry;
use jobs_common::clock::{Clock, SystemClock};
use jobs_common::manager::{JobManager, ManagerConfig};
use jobs_common::metrics::{serve, setup_metrics_router};
use jobs_common::processor::JobProcessor;
use jobs_common::registry::HandlerRegistry;
use jobs_common::retry::RetryPolicy;
use jobs_common::serializer::JsonSerializer;
use jobs_common::store::memory::InMemoryStore;
use jobs_common::store::redis::{DistributedStore, RedisConnection};
use jobs_common::worker::orchestrator::Orchestrator;

use config::Config;

mod config;
mod handlers;

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn build_registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .register("echo", Arc::new(JsonSerializer), handlers::echo)
        .build()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("worker".to_string(), time::Duration::seconds(60))
        .await;

    let worker_id = config
        .worker
        .worker_id
        .as_ref()
        .and_then(|value| Uuid::parse_str(value.as_str()).ok())
        .unwrap_or_else(Uuid::now_v7);

    let registry = Arc::new(build_registry());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let manager_config = ManagerConfig {
        default_max_retries: config.manager.default_max_retries,
        retry_policy: RetryPolicy::new(config.manager.retry_delay_base_seconds),
    };

    let router = Router::new()
        .route("/_readiness", get(|| ready("ok")))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_router().merge(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    if let Some(redis_url) = &config.redis_url {
        let connection = RedisConnection::connect(redis_url)
            .await
            .expect("failed to connect to redis");
        let store = Arc::new(DistributedStore::new(connection));
        let manager = Arc::new(JobManager::new(store.clone(), clock.clone(), manager_config));
        let processor = Arc::new(JobProcessor::new(registry, manager.clone()));

        let orchestrator = Orchestrator::new(
            manager,
            store,
            processor,
            clock,
            worker_id,
            config.worker,
            config.recovery,
        );

        tokio::spawn(async move {
            loop {
                worker_liveness.report_healthy().await;
                tokio::time::sleep(std::time::Duration::from_secs(20)).await;
            }
        });

        orchestrator.run(cancel).await;
    } else {
        tracing::warn!("no REDIS_URL set; running against a single-process in-memory store with no cross-process recovery");
        let store = Arc::new(InMemoryStore::new());
        let manager = Arc::new(JobManager::new(store.clone(), clock.clone(), manager_config));
        let processor = Arc::new(JobProcessor::new(registry, manager.clone()));

        let orchestrator = Orchestrator::new(
            manager,
            store,
            processor,
            clock,
            worker_id,
            config.worker,
            config.recovery,
        );

        tokio::spawn(async move {
            loop {
                worker_liveness.report_healthy().await;
                tokio::time::sleep(std::time::Duration::from_secs(20)).await;
            }
        });

        orchestrator.run(cancel).await;
    }
}
