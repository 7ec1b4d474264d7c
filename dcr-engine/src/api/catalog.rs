//! Catalog Store API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::{self, catalog::ModelFilter},
    error::{ApiError, ApiResult},
    models::{CatalogCapacity, CatalogModel, NewCatalogModel, Price},
    AppState,
};

/// GET /catalog/models query
#[derive(Debug, Default, Deserialize)]
pub struct ModelSearchQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub marca: Option<String>,
}

/// A model together with its capacities
#[derive(Debug, Serialize)]
pub struct ModelDetail {
    #[serde(flatten)]
    pub model: CatalogModel,
    pub capacities: Vec<CatalogCapacity>,
}

/// PUT /catalog/capacities/:id/prices/:channel request
#[derive(Debug, Deserialize)]
pub struct SetPriceRequest {
    pub price: Price,
}

/// GET /catalog/models?q=&tipo=&marca=
pub async fn search_models(
    State(state): State<AppState>,
    Query(query): Query<ModelSearchQuery>,
) -> ApiResult<Json<Vec<CatalogModel>>> {
    let filter = ModelFilter {
        query: query.q,
        device_type: query.tipo,
        brand: query.marca,
    };
    Ok(Json(db::catalog::search_models(&state.db, &filter).await?))
}

/// POST /catalog/models
pub async fn create_model(
    State(state): State<AppState>,
    Json(new_model): Json<NewCatalogModel>,
) -> ApiResult<(StatusCode, Json<ModelDetail>)> {
    new_model.validate().map_err(ApiError::Validation)?;

    let mut tx = state.db.begin().await.map_err(dcr_common::Error::from)?;
    if let Some(model_id) =
        db::catalog::find_model_id(&mut tx, &new_model.brand, &new_model.description).await?
    {
        return Err(ApiError::Conflict(format!(
            "{} {} already exists as model {}",
            new_model.brand.trim(),
            new_model.description.trim(),
            model_id
        )));
    }

    let (model, capacities) = db::catalog::create_model(&mut tx, &new_model).await?;
    tx.commit().await.map_err(dcr_common::Error::from)?;

    tracing::info!(
        model_id = model.id,
        description = %model.description,
        capacities = capacities.len(),
        "Catalog model created"
    );

    Ok((StatusCode::CREATED, Json(ModelDetail { model, capacities })))
}

/// GET /catalog/models/:id
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> ApiResult<Json<ModelDetail>> {
    let model = db::catalog::get_model(&state.db, model_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("model {}", model_id)))?;
    let capacities = db::catalog::list_capacities(&state.db, model_id).await?;
    Ok(Json(ModelDetail { model, capacities }))
}

/// DELETE /catalog/models/:id
///
/// Capacities, codes and prices are removed with the model.
pub async fn delete_model(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if db::catalog::delete_model(&state.db, model_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("model {}", model_id)))
    }
}

/// GET /catalog/models/:id/capacities
pub async fn list_capacities(
    State(state): State<AppState>,
    Path(model_id): Path<i64>,
) -> ApiResult<Json<Vec<CatalogCapacity>>> {
    if db::catalog::get_model(&state.db, model_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("model {}", model_id)));
    }
    Ok(Json(db::catalog::list_capacities(&state.db, model_id).await?))
}

/// PUT /catalog/capacities/:id/prices/:channel
///
/// Manual price edit, under the same per-capacity lock as batch apply.
pub async fn set_price(
    State(state): State<AppState>,
    Path((capacity_id, channel)): Path<(i64, String)>,
    Json(request): Json<SetPriceRequest>,
) -> ApiResult<Json<CatalogCapacity>> {
    if request.price.cents() < 0 {
        return Err(ApiError::Validation("price must not be negative".to_string()));
    }

    let _guard = state.capacity_locks.lock(capacity_id).await;
    let mut tx = state.db.begin().await.map_err(dcr_common::Error::from)?;
    if db::catalog::get_capacity(&mut tx, capacity_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("capacity {}", capacity_id)));
    }
    db::catalog::upsert_price(&mut tx, capacity_id, &channel, request.price).await?;
    let capacity = db::catalog::get_capacity(&mut tx, capacity_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("capacity {}", capacity_id)))?;
    tx.commit().await.map_err(dcr_common::Error::from)?;

    tracing::info!(capacity_id, channel = %channel, price = %request.price, "Catalog price set");
    Ok(Json(capacity))
}

/// Build catalog routes
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/catalog/models", get(search_models).post(create_model))
        .route("/catalog/models/:id", get(get_model).delete(delete_model))
        .route("/catalog/models/:id/capacities", get(list_capacities))
        .route("/catalog/capacities/:id/prices/:channel", put(set_price))
}
