//! Staging batch API handlers
//!
//! Launch, poll, cancel and remap batches; read their diff, review queue and
//! metrics; apply their changes to the catalog.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiResult,
    models::{DiffReport, FeedListing},
    services::{metrics, ApplyFilter, ApplyReport, BatchMetrics, LogPage, ReviewItem, TaskStatus},
    AppState,
};

/// POST /batches request
#[derive(Debug, Deserialize)]
pub struct LaunchBatchRequest {
    pub listings: Vec<FeedListing>,
    /// Sales channel to diff against; the configured target channel when absent
    #[serde(default)]
    pub channel: Option<String>,
}

/// GET /batches/:id/logs query
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub since: i64,
}

/// GET /batches/:id/review response
#[derive(Debug, Serialize)]
pub struct ReviewQueueResponse {
    pub batch_id: Uuid,
    pub items: Vec<ReviewItem>,
}

/// POST /batches
///
/// Stage a feed and start matching it. Returns 202 Accepted with the batch id.
pub async fn launch_batch(
    State(state): State<AppState>,
    Json(request): Json<LaunchBatchRequest>,
) -> ApiResult<(StatusCode, Json<TaskStatus>)> {
    let status = state
        .orchestrator
        .launch(request.listings, request.channel)
        .await?;

    tracing::info!(
        batch_id = %status.batch_id,
        total = status.progress.total,
        "Batch launched"
    );

    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// GET /batches/:id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<TaskStatus>> {
    Ok(Json(state.orchestrator.status(batch_id).await?))
}

/// GET /batches/:id/logs?since=N
pub async fn get_logs(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogPage>> {
    Ok(Json(state.orchestrator.logs(batch_id, query.since).await?))
}

/// POST /batches/:id/cancel
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<TaskStatus>> {
    Ok(Json(state.orchestrator.cancel(batch_id).await?))
}

/// POST /batches/:id/remap
///
/// Replay the batch's listings against the current catalog in a new batch.
pub async fn remap_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TaskStatus>)> {
    let status = state.orchestrator.remap(batch_id).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// GET /batches/:id/diff
pub async fn get_diff(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<DiffReport>> {
    Ok(Json(state.pipeline.diff_report(batch_id).await?))
}

/// POST /batches/:id/apply
///
/// Conflicts are part of a successful response; only the conflicting records
/// are left unapplied.
pub async fn apply_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(filter): Json<ApplyFilter>,
) -> ApiResult<Json<ApplyReport>> {
    let report = state.pipeline.apply_changes(batch_id, &filter).await?;
    Ok(Json(report))
}

/// GET /batches/:id/review
pub async fn get_review_queue(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<ReviewQueueResponse>> {
    let items = state.review.pending_items(batch_id).await?;
    Ok(Json(ReviewQueueResponse { batch_id, items }))
}

/// GET /batches/:id/metrics
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchMetrics>> {
    Ok(Json(metrics::batch_metrics(&state.db, batch_id).await?))
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(launch_batch))
        .route("/batches/:id/status", get(get_status))
        .route("/batches/:id/logs", get(get_logs))
        .route("/batches/:id/cancel", post(cancel_batch))
        .route("/batches/:id/remap", post(remap_batch))
        .route("/batches/:id/diff", get(get_diff))
        .route("/batches/:id/apply", post(apply_batch))
        .route("/batches/:id/review", get(get_review_queue))
        .route("/batches/:id/metrics", get(get_metrics))
}
