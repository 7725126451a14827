//! Runs only the stuck-job recovery loop against a shared distributed store,
//! for deployments that want recovery decoupled from worker processes.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use tokio_util::sync::CancellationToken;

use health::HealthRegistry;
use jobs_common::clock::{Clock, SystemClock};
use jobs_common::metrics::{serve, setup_metrics_router};
use jobs_common::store::redis::{DistributedStore, RedisConnection};
use jobs_common::store::JobStore;
use jobs_common::worker::recovery::run_recovery;

use config::Config;

mod config;

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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    if !config.recovery.enable_distributed_job_recovery {
        tracing::warn!(
            "enable_distributed_job_recovery is false; this process has nothing to do and will idle"
        );
    }

    let liveness = HealthRegistry::new("liveness");
    let recovery_liveness = liveness
        .register("recovery".to_string(), time::Duration::seconds(60))
        .await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let connection = RedisConnection::connect(&config.redis_url)
        .await
        .expect("failed to connect to redis");
    let store = Arc::new(DistributedStore::new(connection));
    assert!(
        store.supports_recovery(),
        "the distributed store is expected to support recovery"
    );

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

    tokio::spawn(async move {
        loop {
            recovery_liveness.report_healthy().await;
            tokio::time::sleep(std::time::Duration::from_secs(20)).await;
        }
    });

    run_recovery(store, config.recovery, clock, cancel).await;
}
