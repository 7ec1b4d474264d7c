//! Catalog Store database operations
//!
//! Models, their vendor codes, capacities and per-channel prices.

use chrono::Utc;
use dcr_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use super::parse_timestamp;
use crate::models::{CatalogCapacity, CatalogModel, NewCatalogModel, Price};

/// Model search filters; every field is optional and they combine with AND
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    /// Case-insensitive substring of the description
    pub query: Option<String>,
    pub device_type: Option<String>,
    pub brand: Option<String>,
}

/// Insert a model with its codes, capacities and prices
///
/// Runs on the caller's connection so it can join a wider transaction.
pub async fn create_model(
    conn: &mut SqliteConnection,
    new_model: &NewCatalogModel,
) -> Result<(CatalogModel, Vec<CatalogCapacity>)> {
    new_model.validate().map_err(Error::InvalidInput)?;

    let created_at = Utc::now();
    let model_id: i64 = sqlx::query(
        "INSERT INTO catalog_models (description, device_type, brand, created_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(new_model.description.trim())
    .bind(new_model.device_type.trim())
    .bind(new_model.brand.trim())
    .bind(created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let mut vendor_codes: Vec<String> = new_model
        .vendor_codes
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect();
    vendor_codes.sort();
    vendor_codes.dedup();

    for code in &vendor_codes {
        sqlx::query("INSERT INTO catalog_model_codes (code, model_id) VALUES (?, ?)")
            .bind(code)
            .bind(model_id)
            .execute(&mut *conn)
            .await?;
    }

    let mut capacities = Vec::with_capacity(new_model.capacities.len());
    for capacity in &new_model.capacities {
        let capacity_id: i64 = sqlx::query(
            "INSERT INTO catalog_capacities (model_id, storage_gb) VALUES (?, ?)",
        )
        .bind(model_id)
        .bind(capacity.storage_gb as i64)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        for (channel, price) in &capacity.prices {
            upsert_price(conn, capacity_id, channel, *price).await?;
        }

        capacities.push(CatalogCapacity {
            id: capacity_id,
            model_id,
            storage_gb: capacity.storage_gb,
            prices: capacity.prices.clone(),
        });
    }

    let model = CatalogModel {
        id: model_id,
        description: new_model.description.trim().to_string(),
        device_type: new_model.device_type.trim().to_string(),
        brand: new_model.brand.trim().to_string(),
        vendor_codes,
        created_at,
    };

    tracing::info!(
        model_id,
        description = %model.description,
        capacities = capacities.len(),
        "Catalog model created"
    );

    Ok((model, capacities))
}

pub async fn get_model(pool: &SqlitePool, model_id: i64) -> Result<Option<CatalogModel>> {
    let row = sqlx::query(
        "SELECT id, description, device_type, brand, created_at
         FROM catalog_models WHERE id = ?",
    )
    .bind(model_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let codes: Vec<(String,)> =
        sqlx::query_as("SELECT code FROM catalog_model_codes WHERE model_id = ? ORDER BY code")
            .bind(model_id)
            .fetch_all(pool)
            .await?;

    let created_at: String = row.get("created_at");
    Ok(Some(CatalogModel {
        id: row.get("id"),
        description: row.get("description"),
        device_type: row.get("device_type"),
        brand: row.get("brand"),
        vendor_codes: codes.into_iter().map(|(c,)| c).collect(),
        created_at: parse_timestamp("created_at", &created_at)?,
    }))
}

/// Id of the model with this brand and description, compared case-insensitively
pub async fn find_model_id(
    conn: &mut SqliteConnection,
    brand: &str,
    description: &str,
) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM catalog_models
         WHERE LOWER(brand) = LOWER(?) AND LOWER(description) = LOWER(?)
         ORDER BY id LIMIT 1",
    )
    .bind(brand.trim())
    .bind(description.trim())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Search models, ordered by id
pub async fn search_models(pool: &SqlitePool, filter: &ModelFilter) -> Result<Vec<CatalogModel>> {
    let query_pattern = filter
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q.to_lowercase()));

    let rows = sqlx::query(
        r#"
        SELECT id, description, device_type, brand, created_at
        FROM catalog_models
        WHERE (?1 IS NULL OR LOWER(description) LIKE ?1)
          AND (?2 IS NULL OR LOWER(device_type) = LOWER(?2))
          AND (?3 IS NULL OR LOWER(brand) = LOWER(?3))
        ORDER BY id
        "#,
    )
    .bind(query_pattern)
    .bind(filter.device_type.as_deref().map(str::trim))
    .bind(filter.brand.as_deref().map(str::trim))
    .fetch_all(pool)
    .await?;

    let codes = load_all_codes(pool).await?;
    rows.into_iter()
        .map(|row| model_from_row(&row, &codes))
        .collect()
}

/// Every model in the catalog, ordered by id
pub async fn list_models(pool: &SqlitePool) -> Result<Vec<CatalogModel>> {
    search_models(pool, &ModelFilter::default()).await
}

/// Delete a model; its codes, capacities and prices go with it
///
/// Returns false when the model did not exist.
pub async fn delete_model(pool: &SqlitePool, model_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM catalog_models WHERE id = ?")
        .bind(model_id)
        .execute(pool)
        .await?;

    let deleted = result.rows_affected() > 0;
    if deleted {
        tracing::info!(model_id, "Catalog model deleted");
    }
    Ok(deleted)
}

/// Capacities of one model, ordered by storage
pub async fn list_capacities(pool: &SqlitePool, model_id: i64) -> Result<Vec<CatalogCapacity>> {
    let rows = sqlx::query(
        "SELECT id, model_id, storage_gb FROM catalog_capacities
         WHERE model_id = ? ORDER BY storage_gb, id",
    )
    .bind(model_id)
    .fetch_all(pool)
    .await?;

    let prices = load_all_prices(pool).await?;
    Ok(rows.iter().map(|row| capacity_from_row(row, &prices)).collect())
}

/// Every capacity in the catalog, ordered by id
pub async fn list_all_capacities(pool: &SqlitePool) -> Result<Vec<CatalogCapacity>> {
    let rows = sqlx::query("SELECT id, model_id, storage_gb FROM catalog_capacities ORDER BY id")
        .fetch_all(pool)
        .await?;

    let prices = load_all_prices(pool).await?;
    Ok(rows.iter().map(|row| capacity_from_row(row, &prices)).collect())
}

pub async fn get_capacity(
    conn: &mut SqliteConnection,
    capacity_id: i64,
) -> Result<Option<CatalogCapacity>> {
    let row = sqlx::query("SELECT id, model_id, storage_gb FROM catalog_capacities WHERE id = ?")
        .bind(capacity_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let price_rows = sqlx::query(
        "SELECT capacity_id, channel, price_cents FROM capacity_prices WHERE capacity_id = ?",
    )
    .bind(capacity_id)
    .fetch_all(&mut *conn)
    .await?;

    let prices = group_prices(price_rows);
    Ok(Some(capacity_from_row(&row, &prices)))
}

/// Current price of a capacity on a channel
pub async fn current_price(
    conn: &mut SqliteConnection,
    capacity_id: i64,
    channel: &str,
) -> Result<Option<Price>> {
    let cents: Option<i64> = sqlx::query_scalar(
        "SELECT price_cents FROM capacity_prices WHERE capacity_id = ? AND channel = ?",
    )
    .bind(capacity_id)
    .bind(channel)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(cents.map(Price::from_cents))
}

pub async fn upsert_price(
    conn: &mut SqliteConnection,
    capacity_id: i64,
    channel: &str,
    price: Price,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO capacity_prices (capacity_id, channel, price_cents, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(capacity_id, channel) DO UPDATE SET
            price_cents = excluded.price_cents,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(capacity_id)
    .bind(channel)
    .bind(price.cents())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn delete_price(conn: &mut SqliteConnection, capacity_id: i64, channel: &str) -> Result<()> {
    sqlx::query("DELETE FROM capacity_prices WHERE capacity_id = ? AND channel = ?")
        .bind(capacity_id)
        .bind(channel)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn load_all_codes(pool: &SqlitePool) -> Result<HashMap<i64, Vec<String>>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT code, model_id FROM catalog_model_codes ORDER BY code")
            .fetch_all(pool)
            .await?;

    let mut codes: HashMap<i64, Vec<String>> = HashMap::new();
    for (code, model_id) in rows {
        codes.entry(model_id).or_default().push(code);
    }
    Ok(codes)
}

async fn load_all_prices(pool: &SqlitePool) -> Result<HashMap<i64, BTreeMap<String, Price>>> {
    let rows = sqlx::query("SELECT capacity_id, channel, price_cents FROM capacity_prices")
        .fetch_all(pool)
        .await?;
    Ok(group_prices(rows))
}

fn group_prices(rows: Vec<sqlx::sqlite::SqliteRow>) -> HashMap<i64, BTreeMap<String, Price>> {
    let mut prices: HashMap<i64, BTreeMap<String, Price>> = HashMap::new();
    for row in rows {
        let capacity_id: i64 = row.get("capacity_id");
        let channel: String = row.get("channel");
        let cents: i64 = row.get("price_cents");
        prices
            .entry(capacity_id)
            .or_default()
            .insert(channel, Price::from_cents(cents));
    }
    prices
}

fn model_from_row(
    row: &sqlx::sqlite::SqliteRow,
    codes: &HashMap<i64, Vec<String>>,
) -> Result<CatalogModel> {
    let id: i64 = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(CatalogModel {
        id,
        description: row.get("description"),
        device_type: row.get("device_type"),
        brand: row.get("brand"),
        vendor_codes: codes.get(&id).cloned().unwrap_or_default(),
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn capacity_from_row(
    row: &sqlx::sqlite::SqliteRow,
    prices: &HashMap<i64, BTreeMap<String, Price>>,
) -> CatalogCapacity {
    let id: i64 = row.get("id");
    let storage_gb: i64 = row.get("storage_gb");
    CatalogCapacity {
        id,
        model_id: row.get("model_id"),
        storage_gb: storage_gb as u32,
        prices: prices.get(&id).cloned().unwrap_or_default(),
    }
}
