use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, JobError, JobOutcome};
use crate::job::Job;
use crate::registry::HandlerRegistry;

/// Resolve `job.name` in `registry` and invoke it, catching a handler panic
/// and flattening it into the error model rather than letting it cross the
/// component boundary.
///
/// A missing registration fails with a non-retryable `HANDLER_NOT_FOUND`;
/// the classifier maps it to `Permanent` so it doesn't masquerade as a
/// transient condition worth retrying.
pub async fn execute_handler(registry: &HandlerRegistry, job: &Job, cancel: CancellationToken) -> JobOutcome<Vec<u8>> {
    let Some(registration) = registry.get(&job.name) else {
        return Err(JobError::handler_not_found(&job.name));
    };

    match AssertUnwindSafe(registration.invoke(job.clone(), cancel))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(JobError::new(
            ErrorCode::Handler,
            format!("handler for job name {:?} panicked", job.name),
        )),
    }
}
