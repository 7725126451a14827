use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use jobs_common::context::extract_requested_job_id;
use jobs_common::job::CapturedContext;
use jobs_common::manager::JobManager;
use jobs_common::serializer::{JsonSerializer, Serializer};
use jobs_common::store::JobStore;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub fn add_routes<S: JobStore + 'static>(router: Router, manager: Arc<JobManager<S>>) -> Router {
    router
        .route("/jobs", axum::routing::post(submit_job::<S>))
        .route("/jobs/:id", axum::routing::get(get_job::<S>))
        .with_state(manager)
}

async fn submit_job<S: JobStore + 'static>(
    State(manager): State<Arc<JobManager<S>>>,
    headers: HeaderMap,
    Json(body): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let requested_id = extract_requested_job_id(&headers);
    let context = CapturedContext::from_parts(&headers, HashMap::new(), HashMap::new());
    let payload = JsonSerializer.serialize(&body.payload)?;

    let job = manager
        .submit(body.name, payload, context, requested_id)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn get_job<S: JobStore + 'static>(
    State(manager): State<Arc<JobManager<S>>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = manager.get_job_by_id(id).await?;
    Ok(Json(job))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{self, Request};
    use http_body_util::BodyExt;
    use jobs_common::clock::SystemClock;
    use jobs_common::manager::ManagerConfig;
    use jobs_common::store::memory::InMemoryStore;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let store = Arc::new(InMemoryStore::new());
        let clock: Arc<dyn jobs_common::clock::Clock> = Arc::new(SystemClock);
        let manager = Arc::new(JobManager::new(store, clock, ManagerConfig::default()));
        add_routes(Router::new(), manager)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_returns_202_with_the_new_job() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/jobs")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({"name": "echo", "payload": {"message": "hi"}}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["name"], "echo");
        assert_eq!(body["status"], 100);
    }

    #[tokio::test]
    async fn submit_twice_with_same_async_job_id_is_idempotent() {
        let app = test_app();
        let job_id = "00000000-0000-0000-0000-000000000001";

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(http::Method::POST)
                        .uri("/jobs")
                        .header(http::header::CONTENT_TYPE, "application/json")
                        .header("Async-Job-Id", job_id)
                        .body(Body::from(json!({"name": "echo", "payload": {}}).to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::ACCEPTED);
            let body = body_json(response).await;
            assert_eq!(body["id"], job_id);
        }
    }

    #[tokio::test]
    async fn get_job_returns_404_for_an_unknown_id() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs/00000000-0000-0000-0000-000000000002")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_job_returns_a_previously_submitted_job() {
        let app = test_app();

        let submit_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/jobs")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"name": "echo", "payload": {}}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let submitted = body_json(submit_response).await;
        let id = submitted["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], id);
    }
}
