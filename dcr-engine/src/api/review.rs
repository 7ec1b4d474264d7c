//! Review & correction API handlers
//!
//! POST /review/approve, /review/reject, /review/correct, /review/create-model

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    services::{CreateModelOutcome, DecisionOutcome, NewModelRequest},
    AppState,
};

/// POST /review/approve request
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub tarea_id: Uuid,
    pub staging_item_id: i64,
    /// Apply this listing's price change right after approving
    #[serde(default)]
    pub apply_price: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /review/reject request
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub tarea_id: Uuid,
    pub staging_item_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /review/correct request
#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    pub tarea_id: Uuid,
    pub staging_item_id: i64,
    pub new_capacidad_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /review/create-model request
#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    #[serde(alias = "tarea_id")]
    pub staging_id: Uuid,
    pub staging_item_id: i64,
    pub tipo: String,
    pub marca: String,
    pub modelo: String,
    #[serde(default)]
    pub almacenamiento_gb: Option<u32>,
    #[serde(default)]
    pub capacidades_a_crear: Vec<u32>,
}

/// POST /review/approve
pub async fn approve(
    State(state): State<AppState>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<DecisionOutcome>> {
    let outcome = state
        .review
        .approve(
            request.tarea_id,
            request.staging_item_id,
            request.apply_price,
            request.notes,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /review/reject
pub async fn reject(
    State(state): State<AppState>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<Json<DecisionOutcome>> {
    let outcome = state
        .review
        .reject(request.tarea_id, request.staging_item_id, request.reason)
        .await?;
    Ok(Json(outcome))
}

/// POST /review/correct
pub async fn correct(
    State(state): State<AppState>,
    Json(request): Json<CorrectRequest>,
) -> ApiResult<Json<DecisionOutcome>> {
    let outcome = state
        .review
        .correct(
            request.tarea_id,
            request.staging_item_id,
            request.new_capacidad_id,
            request.reason,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /review/create-model
///
/// Creates the model and re-matches the batch's unresolved listings of it.
/// The response carries `model_id` and `auto_mapped_count` at the top level.
pub async fn create_model(
    State(state): State<AppState>,
    Json(request): Json<CreateModelRequest>,
) -> ApiResult<Json<CreateModelOutcome>> {
    if request.modelo.trim().is_empty() {
        return Err(ApiError::Validation("modelo is required".to_string()));
    }

    let outcome = state
        .review
        .create_model(
            request.staging_id,
            request.staging_item_id,
            NewModelRequest {
                device_type: request.tipo,
                brand: request.marca,
                model: request.modelo,
                storage_gb: request.almacenamiento_gb,
                extra_capacities: request.capacidades_a_crear,
            },
        )
        .await?;

    tracing::info!(
        batch_id = %request.staging_id,
        model_id = outcome.model_id,
        auto_mapped = outcome.auto_mapped_count,
        "Model created from review"
    );

    Ok(Json(outcome))
}

/// Build review routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/review/approve", post(approve))
        .route("/review/reject", post(reject))
        .route("/review/correct", post(correct))
        .route("/review/create-model", post(create_model))
}
