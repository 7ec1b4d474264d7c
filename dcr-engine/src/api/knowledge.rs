//! Knowledge Base API handlers

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::{self, knowledge::KnowledgeHistoryRecord},
    error::{ApiError, ApiResult},
    models::{KnowledgeEntry, KnowledgeMetrics},
    services::knowledge_base,
    AppState,
};

/// GET /knowledge/entry query
#[derive(Debug, Deserialize)]
pub struct EntryQuery {
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryLine {
    #[serde(flatten)]
    pub record: KnowledgeHistoryRecord,
    pub recorded_at: DateTime<Utc>,
}

/// GET /knowledge/entry response
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub entry: KnowledgeEntry,
    pub history: Vec<HistoryLine>,
}

/// GET /knowledge/metrics
pub async fn get_metrics(State(state): State<AppState>) -> ApiResult<Json<KnowledgeMetrics>> {
    Ok(Json(knowledge_base::metrics(&state.db).await?))
}

/// GET /knowledge/entry?signature=...
pub async fn get_entry(
    State(state): State<AppState>,
    Query(query): Query<EntryQuery>,
) -> ApiResult<Json<EntryResponse>> {
    let entry = {
        let mut conn = state.db.acquire().await.map_err(dcr_common::Error::from)?;
        db::knowledge::get_entry(&mut conn, &query.signature).await?
    }
    .ok_or_else(|| ApiError::NotFound(format!("knowledge entry '{}'", query.signature)))?;

    let history = db::knowledge::history_for(&state.db, &query.signature)
        .await?
        .into_iter()
        .map(|(record, recorded_at)| HistoryLine {
            record,
            recorded_at,
        })
        .collect();

    Ok(Json(EntryResponse { entry, history }))
}

/// Build knowledge routes
pub fn knowledge_routes() -> Router<AppState> {
    Router::new()
        .route("/knowledge/metrics", get(get_metrics))
        .route("/knowledge/entry", get(get_entry))
}
