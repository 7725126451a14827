use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of error kinds a [`JobError`] can carry, per the wire
/// contract in spec.md section 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidJob,
    InvalidJobId,
    DuplicateJob,
    NotFound,
    ConcurrencyConflict,
    HandlerNotFound,
    DeserializationFailed,
    SerializationFailed,
    StoreError,
    ClaimConflict,
    Canceled,
    /// An error a registered handler reported explicitly (as opposed to one
    /// originating in the core's own plumbing).
    Handler,
}

/// A flattened, language-agnostic description of whatever was thrown at the
/// point of failure. Jobs are persisted and may outlive the process that
/// raised the error, so by the time anything reads it back the original
/// exception/error value is long gone — this is what survives the trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCause {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<ErrorCause>>,
}

impl ErrorCause {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: None,
            inner: None,
        }
    }

    pub fn with_inner(mut self, inner: ErrorCause) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }
}

impl<E: std::error::Error> From<&E> for ErrorCause {
    fn from(error: &E) -> Self {
        ErrorCause::new(std::any::type_name::<E>(), error.to_string())
    }
}

/// The handler-facing return type: success value or a structured failure.
pub type JobOutcome<T> = Result<T, JobError>;

/// A structured error attached to a job on failure or scheduled retry.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorCause>,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ErrorCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("job {id} was not found"))
    }

    pub fn handler_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::HandlerNotFound,
            format!("no handler is registered for job name {name:?}"),
        )
    }

    pub fn exceeded_max_retries() -> Self {
        Self::new(
            ErrorCode::StoreError,
            "job exceeded its maximum number of retries",
        )
    }
}

/// The classifier's verdict on a failure, used to decide retry behavior.
///
/// Per spec.md section 4.4, the retry policy treats `Transient` and
/// `Unknown` identically: both retry until the budget is exhausted.
/// `Permanent` does not short-circuit retries in this spec; `classify` is
/// exposed so a caller (or a future refinement) can choose to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Permanent,
    Unknown,
}

/// Classify a [`JobError`] into transient/permanent/unknown.
///
/// Transient: timeouts, cancellation due to timeout, and any store-reported
/// unavailability. Permanent: validation/argument errors and invariant
/// violations. Everything else is Unknown.
pub fn classify(error: &JobError) -> Classification {
    match error.code {
        ErrorCode::Canceled | ErrorCode::StoreError => Classification::Transient,
        ErrorCode::InvalidJob
        | ErrorCode::InvalidJobId
        | ErrorCode::DuplicateJob
        | ErrorCode::DeserializationFailed
        | ErrorCode::SerializationFailed
        | ErrorCode::HandlerNotFound => Classification::Permanent,
        ErrorCode::NotFound | ErrorCode::ConcurrencyConflict | ErrorCode::ClaimConflict => {
            Classification::Unknown
        }
        ErrorCode::Handler => Classification::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_classify_as_permanent() {
        let error = JobError::new(ErrorCode::InvalidJob, "missing name");
        assert_eq!(classify(&error), Classification::Permanent);
    }

    #[test]
    fn store_unavailability_classifies_as_transient() {
        let error = JobError::new(ErrorCode::StoreError, "connection reset");
        assert_eq!(classify(&error), Classification::Transient);
    }

    #[test]
    fn cause_chain_nests() {
        let inner = ErrorCause::new("IoError", "connection refused");
        let outer = ErrorCause::new("HandlerError", "request failed").with_inner(inner);

        assert_eq!(outer.inner.as_ref().unwrap().kind, "IoError");
    }
}
