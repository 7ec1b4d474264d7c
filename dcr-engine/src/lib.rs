//! dcr-engine library interface
//!
//! Exposes the services and the HTTP router so integration tests can drive
//! the engine without a listening socket.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use dcr_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::EngineConfig;
use crate::services::{ReviewService, StagingPipeline, TaskOrchestrator};
use crate::utils::KeyedLocks;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<EngineConfig>,
    pub event_bus: EventBus,
    pub pipeline: Arc<StagingPipeline>,
    pub review: Arc<ReviewService>,
    pub orchestrator: Arc<TaskOrchestrator>,
    /// Serializes catalog price writes per capacity
    pub capacity_locks: Arc<KeyedLocks<i64>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: EngineConfig, event_bus: EventBus) -> Self {
        let config = Arc::new(config);
        let capacity_locks = Arc::new(KeyedLocks::new());
        let pipeline = Arc::new(StagingPipeline::new(
            db.clone(),
            Arc::clone(&config),
            event_bus.clone(),
            Arc::clone(&capacity_locks),
        ));
        let review = Arc::new(ReviewService::new(
            db.clone(),
            Arc::clone(&config),
            event_bus.clone(),
            Arc::clone(&pipeline),
        ));
        let orchestrator = Arc::new(TaskOrchestrator::new(db.clone(), Arc::clone(&pipeline)));

        Self {
            db,
            config,
            event_bus,
            pipeline,
            review,
            orchestrator,
            capacity_locks,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_routes())
        .merge(api::review_routes())
        .merge(api::catalog_routes())
        .merge(api::knowledge_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
