//! REST + SSE handlers for the validation API.

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::PipelineError;
use crate::pipeline::events::RunEvent;
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::state::Decision;

/// Seconds of silence before the stream emits a keepalive event.
const KEEPALIVE_SECS: u64 = 25;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::RunNotFound { .. } => Self::NotFound(err.to_string()),
            PipelineError::InvalidSubmission(_) => Self::BadRequest(err.to_string()),
            PipelineError::DecisionConflict { .. } => Self::Conflict(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Self::NotFound(m) => (axum::http::StatusCode::NOT_FOUND, m),
            Self::BadRequest(m) => (axum::http::StatusCode::BAD_REQUEST, m),
            Self::Conflict(m) => (axum::http::StatusCode::CONFLICT, m),
            Self::Internal(m) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/validate", post(submit))
        .route("/api/validate/{id}", get(get_run))
        .route("/api/validate/{id}/stream", get(stream_run))
        .route("/api/validate/{id}/decide", post(decide))
        .route("/api/validations", get(list_runs))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    url: String,
    requested_by: Option<String>,
}

async fn submit(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run_id = state
        .orchestrator
        .submit(&req.url, req.requested_by)
        .await?;
    Ok(Json(json!({ "run_id": run_id })))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run = state.orchestrator.get_state(&id).await?;
    Ok(Json(serde_json::to_value(run).map_err(|e| {
        ApiError::Internal(format!("Failed to serialize run: {}", e))
    })?))
}

#[derive(Debug, Deserialize)]
struct DecideRequest {
    decision: String,
    feedback: Option<String>,
    reviewer: Option<String>,
}

async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DecideRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let decision = Decision::from_str(&req.decision).map_err(ApiError::BadRequest)?;
    let run = state
        .orchestrator
        .decide(&id, decision, req.feedback, req.reviewer)
        .await?;
    Ok(Json(json!({
        "run_id": run.run_id,
        "status": run.status.as_str(),
    })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);
    let runs = state.orchestrator.list_recent(limit).await?;
    Ok(Json(json!({ "runs": runs })))
}

/// Live event stream. 404s when the run has no open channel; finished
/// runs are served by `get_run` instead.
async fn stream_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state
        .orchestrator
        .subscribe(&id)
        .ok_or_else(|| ApiError::NotFound(format!("No live stream for run {}", id)))?;
    debug!(run_id = %id, "SSE subscriber attached");
    Ok(Sse::new(event_stream(rx)))
}

/// Forward broadcast events as SSE frames, injecting a typed keepalive
/// after each quiet period and closing the stream after `done`.
fn event_stream(
    rx: broadcast::Receiver<RunEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        loop {
            match tokio::time::timeout(Duration::from_secs(KEEPALIVE_SECS), rx.recv()).await {
                Ok(Ok(event)) => {
                    let is_done = matches!(event, RunEvent::Done { .. });
                    return Some((Ok(sse_event(&event)), (rx, is_done)));
                }
                // Slow consumer skipped some events; keep reading.
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => {
                    return Some((Ok(sse_event(&RunEvent::Keepalive)), (rx, false)));
                }
            }
        }
    })
}

fn sse_event(event: &RunEvent) -> Event {
    match Event::default().json_data(event) {
        Ok(sse) => sse,
        Err(_) => Event::default().data("{}"),
    }
}
