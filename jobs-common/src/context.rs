use std::collections::HashMap;

use http::HeaderMap;
use uuid::Uuid;

use crate::job::CapturedContext;

/// Header a submitter may set to make `POST /jobs` idempotent: resubmitting
/// with the same value returns the job created the first time rather than
/// creating a second one.
pub const ASYNC_JOB_ID_HEADER: &str = "Async-Job-Id";

impl CapturedContext {
    /// Snapshot a request's headers and path/query parameters at submission
    /// time, before the originating connection goes away.
    ///
    /// `http::HeaderValue` isn't guaranteed UTF-8, so a value that isn't
    /// valid UTF-8 is captured as `None` rather than dropped or erroring —
    /// the caller still learns the header was present.
    pub fn from_parts(
        headers: &HeaderMap,
        route_params: HashMap<String, Option<String>>,
        query_params: HashMap<String, Vec<Option<String>>>,
    ) -> Self {
        let mut captured: HashMap<String, Vec<Option<String>>> = HashMap::new();
        for (name, value) in headers.iter() {
            captured
                .entry(name.as_str().to_owned())
                .or_default()
                .push(value.to_str().ok().map(str::to_owned));
        }

        Self {
            headers: captured,
            route_params,
            query_params,
        }
    }
}

/// Extract the caller-supplied idempotency id, if any, from request headers.
///
/// A missing header or a value that doesn't parse as a UUID both mean
/// "no idempotency requested"; the caller is expected to fall back to a
/// freshly generated id (`Uuid::now_v7()`) in that case.
pub fn extract_requested_job_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(ASYNC_JOB_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
}
