//! Accepts job submissions over HTTP and serves their status back to callers.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use health::HealthRegistry;
use jobs_common::clock::{Clock, SystemClock};
use jobs_common::manager::{JobManager, ManagerConfig};
use jobs_common::metrics::{serve, setup_metrics_router};
use jobs_common::retry::RetryPolicy;
use jobs_common::store::memory::InMemoryStore;
use jobs_common::store::redis::{DistributedStore, RedisConnection};

use config::Config;

mod config;
mod error;
mod handlers;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let api_liveness = liveness
        .register("api".to_string(), time::Duration::seconds(60))
        .await;
    api_liveness.report_healthy().await;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let manager_config = ManagerConfig {
        default_max_retries: config.manager.default_max_retries,
        retry_policy: RetryPolicy::new(config.manager.retry_delay_base_seconds),
    };

    let router = Router::new()
        .route("/_readiness", get(|| ready("ok")))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_router().merge(router);

    let app = if let Some(redis_url) = &config.redis_url {
        let connection = RedisConnection::connect(redis_url)
            .await
            .expect("failed to connect to redis");
        let store = Arc::new(DistributedStore::new(connection));
        let manager = Arc::new(JobManager::new(store, clock, manager_config));
        handlers::add_routes(router, manager)
    } else {
        tracing::warn!(
            "no REDIS_URL set; submitted jobs are only visible to this process's own workers"
        );
        let store = Arc::new(InMemoryStore::new());
        let manager = Arc::new(JobManager::new(store, clock, manager_config));
        handlers::add_routes(router, manager)
    };

    let bind = config.bind();
    match serve(app, &bind).await {
        Ok(()) => {}
        Err(error) => tracing::error!(%error, "failed to start jobs-api http server"),
    }
}
