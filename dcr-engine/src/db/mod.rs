//! Database access for dcr-engine
//!
//! Single SQLite database holding the Catalog Store, the Knowledge Base and
//! every staging batch with its listings, results, changes, decisions and logs.

pub mod batches;
pub mod catalog;
pub mod knowledge;
pub mod settings;

use dcr_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Initialize database connection pool and create tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(250));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create all engine tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database tables initialized ({} statements)", SCHEMA.len());
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_models (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        description TEXT NOT NULL,
        device_type TEXT NOT NULL,
        brand TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_model_codes (
        code TEXT NOT NULL,
        model_id INTEGER NOT NULL REFERENCES catalog_models(id) ON DELETE CASCADE,
        PRIMARY KEY (code, model_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_capacities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        model_id INTEGER NOT NULL REFERENCES catalog_models(id) ON DELETE CASCADE,
        storage_gb INTEGER NOT NULL,
        UNIQUE (model_id, storage_gb)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS capacity_prices (
        capacity_id INTEGER NOT NULL REFERENCES catalog_capacities(id) ON DELETE CASCADE,
        channel TEXT NOT NULL,
        price_cents INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (capacity_id, channel)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_entries (
        signature TEXT PRIMARY KEY,
        capacity_id INTEGER NOT NULL,
        confidence INTEGER NOT NULL,
        times_confirmed INTEGER NOT NULL DEFAULT 0,
        times_corrected INTEGER NOT NULL DEFAULT 0,
        user_validated INTEGER NOT NULL DEFAULT 0,
        algorithm TEXT NOT NULL,
        last_confirmed_at TEXT,
        last_corrected_at TEXT,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        signature TEXT NOT NULL,
        capacity_id INTEGER NOT NULL,
        event TEXT NOT NULL,
        confidence_before INTEGER,
        confidence_after INTEGER NOT NULL,
        batch_id TEXT,
        staging_item_id INTEGER,
        recorded_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_batches (
        batch_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        channel TEXT NOT NULL,
        progress_processed INTEGER NOT NULL DEFAULT 0,
        progress_total INTEGER NOT NULL DEFAULT 0,
        incomplete INTEGER NOT NULL DEFAULT 0,
        applied_count INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        source_batch_id TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        ended_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_listings (
        batch_id TEXT NOT NULL REFERENCES staging_batches(batch_id) ON DELETE CASCADE,
        staging_item_id INTEGER NOT NULL,
        model_raw TEXT NOT NULL,
        model_norm TEXT NOT NULL,
        device_family TEXT NOT NULL,
        brand TEXT NOT NULL,
        storage_gb INTEGER,
        price_cents INTEGER NOT NULL,
        vendor_code TEXT,
        year INTEGER,
        cpu TEXT,
        review_state TEXT NOT NULL DEFAULT 'pending',
        PRIMARY KEY (batch_id, staging_item_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS match_results (
        batch_id TEXT NOT NULL REFERENCES staging_batches(batch_id) ON DELETE CASCADE,
        staging_item_id INTEGER NOT NULL,
        revision INTEGER NOT NULL,
        capacity_id INTEGER,
        model_id INTEGER,
        confidence INTEGER NOT NULL,
        algorithm TEXT NOT NULL,
        needs_review INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (batch_id, staging_item_id, revision)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS staging_changes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_id TEXT NOT NULL REFERENCES staging_batches(batch_id) ON DELETE CASCADE,
        staging_item_id INTEGER,
        kind TEXT NOT NULL,
        modelo_norm TEXT NOT NULL,
        capacity_id INTEGER NOT NULL,
        before_cents INTEGER,
        after_cents INTEGER,
        delta_cents INTEGER,
        confidence INTEGER NOT NULL,
        algorithm TEXT,
        superseded INTEGER NOT NULL DEFAULT 0,
        applied INTEGER NOT NULL DEFAULT 0,
        applied_at TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_staging_changes_batch
        ON staging_changes (batch_id, superseded)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS review_decisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_id TEXT NOT NULL REFERENCES staging_batches(batch_id) ON DELETE CASCADE,
        staging_item_id INTEGER NOT NULL,
        decision TEXT NOT NULL,
        target_capacity_id INTEGER,
        notes TEXT,
        decided_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batch_logs (
        batch_id TEXT NOT NULL REFERENCES staging_batches(batch_id) ON DELETE CASCADE,
        seq INTEGER NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        logged_at TEXT NOT NULL,
        PRIMARY KEY (batch_id, seq)
    )
    "#,
];

/// Parse an RFC 3339 timestamp column
pub(crate) fn parse_timestamp(
    column: &str,
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| dcr_common::Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse an optional RFC 3339 timestamp column
pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}
