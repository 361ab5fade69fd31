//! Evaluation endpoints: submit, poll and stream status.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::error::ApiError;
use super::routes::AppState;
use super::types::{PairwiseComparisonRequest, SingleResponseRequest, SubmitResponse};
use crate::task::{EvaluationError, EvaluationRequest, TaskStatus, TaskView};

const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/single_response", post(submit_single_response))
        .route("/pairwise_comparison", post(submit_pairwise_comparison))
        .route("/status/:id", get(get_status))
        .route("/status/:id/stream", get(stream_status))
}

async fn submit(
    state: &AppState,
    request: EvaluationRequest,
) -> Result<Json<SubmitResponse>, ApiError> {
    let evaluation_id = state.orchestrator.submit(request).await?;
    Ok(Json(SubmitResponse {
        evaluation_id,
        status: TaskStatus::Pending,
    }))
}

/// POST /v1/evaluate/single_response
async fn submit_single_response(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SingleResponseRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = body?;
    submit(&state, req.into()).await
}

/// POST /v1/evaluate/pairwise_comparison
async fn submit_pairwise_comparison(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PairwiseComparisonRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = body?;
    submit(&state, req.into()).await
}

/// Ids that are not UUIDs are reported exactly like unknown ones.
fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(format!("Evaluation {} not found", raw)))
}

/// GET /v1/evaluate/status/:id
async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.orchestrator.get_status(id).await?))
}

/// GET /v1/evaluate/status/:id/stream
///
/// Emits a `status` event whenever the status changes and a final `done`
/// event carrying the terminal view.
async fn stream_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id = parse_id(&id)?;
    let first = state.orchestrator.get_status(id).await?;

    let stream = async_stream::stream! {
        let mut view = first;
        let mut last_sent: Option<TaskStatus> = None;

        loop {
            if view.status.is_terminal() {
                match Event::default().event("done").json_data(&view) {
                    Ok(event) => yield Ok(event),
                    Err(e) => tracing::warn!("Failed to encode done event for {}: {}", id, e),
                }
                break;
            }

            if last_sent != Some(view.status) {
                match Event::default().event("status").json_data(&view) {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        tracing::warn!("Failed to encode status event for {}: {}", id, e);
                        break;
                    }
                }
                last_sent = Some(view.status);
            }

            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
            view = match state.orchestrator.get_status(id).await {
                Ok(view) => view,
                Err(EvaluationError::NotFound(_)) => break,
                Err(e) => {
                    tracing::warn!("Status stream for {} stopped: {}", id, e);
                    break;
                }
            };
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
