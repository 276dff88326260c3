//! Queue control endpoints
//!
//! Endpoints:
//!   GET  /v1/status        - QueueSnapshot JSON
//!   POST /v1/sync          - run the processor now, returns RunSummary JSON
//!   POST /v1/retry-failed  - requeue failed tasks, returns {"count": n}
//!   POST /v1/clear         - drop every task, returns {"count": n}
//!   POST /v1/tasks         - enqueue {"kind", "payload"}, returns {"id"}

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use uplink_core::types::{QueueSnapshot, RunSummary};
use uplink_core::UplinkError;
use uplink_sync::SyncEngine;

use crate::metrics::SyncMetrics;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<SyncEngine>,
    pub metrics: SyncMetrics,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/status", get(status_handler))
        .route("/v1/sync", post(sync_handler))
        .route("/v1/retry-failed", post(retry_failed_handler))
        .route("/v1/clear", post(clear_handler))
        .route("/v1/tasks", post(enqueue_handler))
        .with_state(state)
}

struct ApiError(UplinkError);

impl From<UplinkError> for ApiError {
    fn from(e: UplinkError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            UplinkError::InvalidTask(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(status = status.as_u16(), error = %self.0, "control request failed");
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    kind: String,
    #[serde(default = "empty_object")]
    payload: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Serialize, Deserialize)]
struct EnqueueResponse {
    id: String,
}

async fn status_handler(State(state): State<ApiState>) -> Result<Json<QueueSnapshot>, ApiError> {
    Ok(Json(state.engine.status()?))
}

async fn sync_handler(State(state): State<ApiState>) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(state.engine.run_now().await?))
}

async fn retry_failed_handler(
    State(state): State<ApiState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.engine.retry_failed()?;
    state.metrics.refresh_queue();
    Ok(Json(CountResponse { count }))
}

async fn clear_handler(State(state): State<ApiState>) -> Result<Json<CountResponse>, ApiError> {
    let count = state.engine.clear()?;
    state.metrics.refresh_queue();
    Ok(Json(CountResponse { count }))
}

async fn enqueue_handler(
    State(state): State<ApiState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let id = state.engine.enqueue(&req.kind, req.payload)?;
    state.metrics.refresh_queue();
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            id: id.as_str().to_string(),
        }),
    ))
}
