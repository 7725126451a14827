use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::JobError;

/// The lifecycle state of a job.
///
/// The numeric values are part of the wire format: the distributed store
/// persists these numbers directly in its hash representation, and clients
/// reading a job back over HTTP see the same values. Gaps between states
/// leave room for intermediate states to be inserted later without a
/// breaking renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_u16(self) -> u16 {
        match self {
            JobStatus::Queued => 100,
            JobStatus::Scheduled => 200,
            JobStatus::InProgress => 300,
            JobStatus::Completed => 400,
            JobStatus::Failed => 500,
            JobStatus::Canceled => 600,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            100 => Some(JobStatus::Queued),
            200 => Some(JobStatus::Scheduled),
            300 => Some(JobStatus::InProgress),
            400 => Some(JobStatus::Completed),
            500 => Some(JobStatus::Failed),
            600 => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    /// Terminal statuses never transition to anything else.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

struct JobStatusVisitor;

impl<'de> Visitor<'de> for JobStatusVisitor {
    type Value = JobStatus;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a job status code (100, 200, 300, 400, 500, or 600)")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        JobStatus::from_u16(value as u16)
            .ok_or_else(|| de::Error::custom(format!("unknown job status code {value}")))
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_u16(JobStatusVisitor)
    }
}

/// Caller-supplied context captured at submission time and replayed back to
/// the handler on every claim. Analogous to request-scoped data (headers,
/// route and query parameters) that a handler might need but that isn't part
/// of the job's own payload.
///
/// Headers and query parameters keep every value a repeated key carried
/// (`Vec<Option<String>>`, nullable because `http::HeaderValue` isn't
/// guaranteed UTF-8); route params can only ever have one value per name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapturedContext {
    #[serde(default)]
    pub headers: HashMap<String, Vec<Option<String>>>,
    #[serde(default)]
    pub route_params: HashMap<String, Option<String>>,
    #[serde(default)]
    pub query_params: HashMap<String, Vec<Option<String>>>,
}

/// A unit of asynchronous work, as persisted by a [`crate::store::JobStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    /// The serialized request payload, in whatever format the configured
    /// `Serializer` produced it. Opaque to the store.
    pub payload: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// If set, the job is not eligible to be claimed until this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: CapturedContext,
    /// Optimistic-concurrency fencing token, bumped on every mutation.
    /// Not exposed over the public API; stores use it to detect a
    /// concurrent write and reject a claim or update that raced one.
    #[serde(default)]
    pub version: u64,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        payload: Vec<u8>,
        max_retries: u32,
        context: CapturedContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_id(Uuid::now_v7(), name, payload, max_retries, context, now)
    }

    pub fn with_id(
        id: Uuid,
        name: impl Into<String>,
        payload: Vec<u8>,
        max_retries: u32,
        context: CapturedContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status: JobStatus::Queued,
            payload,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            retry_delay_until: None,
            worker_id: None,
            created_at: now,
            last_updated_at: now,
            started_at: None,
            completed_at: None,
            context,
            version: 0,
        }
    }

    /// Whether the job is currently eligible to be claimed by a worker:
    /// queued or scheduled, and (if scheduled) its delay has elapsed.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => true,
            JobStatus::Scheduled => self
                .retry_delay_until
                .map(|until| until <= now)
                .unwrap_or(true),
            _ => false,
        }
    }

    pub fn has_retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
