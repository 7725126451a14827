use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jobs_common::manager::ManagerError;
use jobs_common::serializer::SerializeError;
use serde::Serialize;

/// Problem-response body returned for any request that fails. Mirrors the
/// shape a `JobError` renders to, so clients see the same `code`/`message`
/// pair whether the failure came from a handler or from the API itself.
#[derive(Debug, Serialize)]
pub struct ApiError {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.code {
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_job_id" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self)).into_response()
    }
}

impl From<ManagerError> for ApiError {
    fn from(error: ManagerError) -> Self {
        match error {
            ManagerError::NotFound(id) => {
                ApiError::new("not_found", format!("job {id} was not found"))
            }
            other => ApiError::new("store_error", other.to_string()),
        }
    }
}

impl From<SerializeError> for ApiError {
    fn from(error: SerializeError) -> Self {
        ApiError::new("invalid_payload", error.to_string())
    }
}
