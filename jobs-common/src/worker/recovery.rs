use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::RecoveryConfig;
use crate::store::JobStore;

/// Periodically reclaims jobs stuck `InProgress` past `job_timeout`, only
/// meaningful against a store that reports `supports_recovery() == true`.
/// The caller is expected to check that before spawning this loop.
pub async fn run_recovery<S: JobStore>(
    store: Arc<S>,
    config: RecoveryConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.check_interval()) => {}
            _ = cancel.cancelled() => break,
        }

        let now = clock.now();
        let stuck_after = config.job_timeout();

        match store
            .recover_stuck_jobs(stuck_after, now, config.maximum_retries)
            .await
        {
            Ok(recovered) => {
                if !recovered.is_empty() {
                    metrics::counter!("jobs_recovered_total").increment(recovered.len() as u64);
                    tracing::info!(count = recovered.len(), "recovered stuck jobs");
                }
            }
            Err(error) => {
                tracing::error!(%error, "stuck job recovery failed");
            }
        }
    }

    tracing::info!("recovery loop exiting");
}
