//! Test Helper Utilities
//!
//! Shared setup for dcr-engine integration tests: a file-backed database in a
//! temporary directory, a small seeded catalog and feed builders.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
};
use chrono::Utc;
use dcr_common::events::EventBus;
use dcr_engine::config::EngineConfig;
use dcr_engine::models::{
    FeedListing, MatchAlgorithm, MatchResult, NewCatalogCapacity, NewCatalogModel, Price,
};
use dcr_engine::services::knowledge_base::learned_entry;
use dcr_engine::AppState;
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tempfile::TempDir;
use uuid::Uuid;

/// Capacity ids of the seeded catalog
///
/// | model      | GB  | b2b price |
/// |------------|-----|-----------|
/// | iPhone 13  | 128 | 400       |
/// | iPhone 13  | 256 | 480       |
/// | iPhone 12  | 64  | 250       |
/// | iPhone 12  | 128 | -         |
/// | Galaxy S21 | 128 | 300       |
/// | Pixel 6    | 128 | 200       |
#[derive(Debug, Clone, Copy)]
pub struct SeededCatalog {
    pub iphone13: i64,
    pub iphone13_128: i64,
    pub iphone13_256: i64,
    pub iphone12_64: i64,
    pub iphone12_128: i64,
    pub galaxy_s21_128: i64,
    pub pixel6_128: i64,
}

/// Create a temporary database with every engine table
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test_dcr.db");
    let pool = dcr_engine::db::init_database_pool(&db_path)
        .await
        .expect("Failed to initialize test database");
    (temp_dir, pool)
}

/// Application state over a fresh database with the catalog seeded
pub async fn create_test_state() -> (TempDir, AppState, SeededCatalog) {
    let (temp_dir, pool) = create_test_db().await;
    let catalog = seed_catalog(&pool).await;
    let state = AppState::new(pool, EngineConfig::default(), EventBus::new(100));
    (temp_dir, state, catalog)
}

pub async fn seed_catalog(pool: &SqlitePool) -> SeededCatalog {
    let iphone13 = create_model(pool, "Apple", "iPhone 13", &["A2633", "A2482"], &[(128, Some(400.0)), (256, Some(480.0))]).await;
    let iphone12 = create_model(pool, "Apple", "iPhone 12", &["A2403"], &[(64, Some(250.0)), (128, None)]).await;
    let galaxy = create_model(pool, "Samsung", "Galaxy S21", &["SM-G991B"], &[(128, Some(300.0))]).await;
    let pixel = create_model(pool, "Google", "Pixel 6", &[], &[(128, Some(200.0))]).await;

    SeededCatalog {
        iphone13: iphone13.0,
        iphone13_128: iphone13.1[0],
        iphone13_256: iphone13.1[1],
        iphone12_64: iphone12.1[0],
        iphone12_128: iphone12.1[1],
        galaxy_s21_128: galaxy.1[0],
        pixel6_128: pixel.1[0],
    }
}

/// Insert one smartphone model; returns its id and capacity ids in order
pub async fn create_model(
    pool: &SqlitePool,
    brand: &str,
    description: &str,
    codes: &[&str],
    capacities: &[(u32, Option<f64>)],
) -> (i64, Vec<i64>) {
    let new_model = NewCatalogModel {
        description: description.to_string(),
        device_type: "Smartphone".to_string(),
        brand: brand.to_string(),
        vendor_codes: codes.iter().map(|c| c.to_string()).collect(),
        capacities: capacities
            .iter()
            .map(|&(storage_gb, price)| {
                let mut prices = BTreeMap::new();
                if let Some(price) = price {
                    prices.insert("b2b".to_string(), Price::from_units(price));
                }
                NewCatalogCapacity { storage_gb, prices }
            })
            .collect(),
    };

    let mut conn = pool.acquire().await.unwrap();
    let (model, created) = dcr_engine::db::catalog::create_model(&mut conn, &new_model)
        .await
        .expect("Failed to seed catalog model");
    (model.id, created.iter().map(|c| c.id).collect())
}

/// A smartphone listing as the feed delivers it
pub fn feed(brand: &str, model: &str, storage_gb: Option<u32>, price: f64) -> FeedListing {
    FeedListing {
        modelo_raw: format!("{} {}", brand, model),
        modelo_norm: model.to_string(),
        tipo: "Smartphone".to_string(),
        marca: brand.to_string(),
        almacenamiento_gb: storage_gb,
        precio_b2b: Price::from_units(price),
        vendor_code: None,
        year: None,
        cpu: None,
    }
}

/// Store a Knowledge Base entry that was never reviewed
pub async fn seed_knowledge(pool: &SqlitePool, signature: &str, capacity_id: i64, confidence: u8) {
    let entry = learned_entry(signature, capacity_id, confidence, MatchAlgorithm::Fuzzy, Utc::now());
    let mut conn = pool.acquire().await.unwrap();
    dcr_engine::db::knowledge::upsert_entry(&mut conn, &entry)
        .await
        .expect("Failed to seed knowledge entry");
}

/// Launch a batch and wait for its background task
pub async fn run_feed(state: &AppState, listings: Vec<FeedListing>) -> Uuid {
    let status = state
        .orchestrator
        .launch(listings, None)
        .await
        .expect("Failed to launch batch");
    state
        .orchestrator
        .wait_for(status.batch_id)
        .await
        .expect("Failed to wait for batch");
    status.batch_id
}

pub async fn current_result(pool: &SqlitePool, batch_id: Uuid, staging_item_id: i64) -> MatchResult {
    let mut conn = pool.acquire().await.unwrap();
    dcr_engine::db::batches::load_current_result(&mut conn, batch_id, staging_item_id)
        .await
        .unwrap()
        .expect("listing has no match result")
}

pub async fn price_of(pool: &SqlitePool, capacity_id: i64) -> Option<Price> {
    let mut conn = pool.acquire().await.unwrap();
    dcr_engine::db::catalog::current_price(&mut conn, capacity_id, "b2b")
        .await
        .unwrap()
}

pub async fn set_price(pool: &SqlitePool, capacity_id: i64, price: f64) {
    let mut conn = pool.acquire().await.unwrap();
    dcr_engine::db::catalog::upsert_price(&mut conn, capacity_id, "b2b", Price::from_units(price))
        .await
        .unwrap();
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
