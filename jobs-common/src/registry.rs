use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorCode, JobError, JobOutcome};
use crate::job::{CapturedContext, Job};
use crate::serializer::Serializer;

/// Sentinel request type for handlers that take no body, so the dispatch
/// interface stays uniform across both handler shapes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoBody;

/// What a handler sees: its deserialized request plus the HTTP context
/// captured when the job was submitted. Built fresh on every invocation —
/// there is no ambient or global scope to thread through.
#[derive(Debug, Clone)]
pub struct AsyncContext<Req = NoBody> {
    pub request: Req,
    pub job_id: Uuid,
    pub job_name: String,
    pub captured: CapturedContext,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Invoker = Arc<dyn Fn(Job, CancellationToken) -> BoxFuture<JobOutcome<Vec<u8>>> + Send + Sync>;

/// A single registered job name: a type-erased invoker that deserializes the
/// job's payload, calls the handler, and serializes its response back to
/// bytes, closing over the concrete request/response types and serializer
/// the caller registered it with.
pub struct HandlerRegistration {
    invoke: Invoker,
}

impl HandlerRegistration {
    pub(crate) fn invoke(&self, job: Job, cancel: CancellationToken) -> BoxFuture<JobOutcome<Vec<u8>>> {
        (self.invoke)(job, cancel)
    }
}

/// A process-wide, immutable-after-`build()` map from job name to handler.
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerRegistration>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&HandlerRegistration> {
        self.handlers.get(name)
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, HandlerRegistration>,
}

impl HandlerRegistryBuilder {
    /// Register a handler for `name`, backed by `serializer` for converting
    /// between `Req`/`Res` and the job's raw `payload`/`result` bytes.
    pub fn register<Req, Res, Z, F, Fut>(mut self, name: impl Into<String>, serializer: Arc<Z>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        Z: Serializer + 'static,
        F: Fn(AsyncContext<Req>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome<Res>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke: Invoker = Arc::new(move |job, cancel| {
            let handler = handler.clone();
            let serializer = serializer.clone();
            Box::pin(async move {
                let request: Req = serializer
                    .deserialize(&job.payload)
                    .map_err(|error| JobError::new(ErrorCode::DeserializationFailed, error.to_string()))?;

                let context = AsyncContext {
                    request,
                    job_id: job.id,
                    job_name: job.name.clone(),
                    captured: job.context.clone(),
                };

                let response = handler(context, cancel).await?;

                serializer
                    .serialize(&response)
                    .map_err(|error| JobError::new(ErrorCode::SerializationFailed, error.to_string()))
            })
        });

        self.handlers.insert(name.into(), HandlerRegistration { invoke });
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
