//! Staging batch persistence
//!
//! Batch headers, staged listings, match result revisions, change records,
//! review decisions and per-batch log lines.

use chrono::Utc;
use dcr_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqliteExecutor, SqlitePool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp};
use crate::models::{
    BatchLogLine, BatchProgress, BatchStatus, ChangeRecord, ExternalListing, MatchAlgorithm,
    MatchResult, Price, ReviewDecision, ReviewState, StagingBatch,
};
use crate::utils::retry_on_lock;

/// Message persisted on batches found unfinished at startup
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

/// A change record as stored, with its row id and application flag
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChange {
    pub id: i64,
    pub record: ChangeRecord,
    pub applied: bool,
}

// ============================================================================
// Batch headers
// ============================================================================

/// Insert a new batch together with its listings, in one transaction
pub async fn insert_batch(
    pool: &SqlitePool,
    batch: &StagingBatch,
    listings: &[ExternalListing],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO staging_batches (
            batch_id, status, channel, progress_processed, progress_total,
            incomplete, applied_count, error_message, source_batch_id,
            created_at, started_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.batch_id.to_string())
    .bind(batch.status.as_str())
    .bind(&batch.channel)
    .bind(batch.progress.processed as i64)
    .bind(batch.progress.total as i64)
    .bind(batch.incomplete)
    .bind(batch.applied_count)
    .bind(&batch.error_message)
    .bind(batch.source_batch_id.map(|id| id.to_string()))
    .bind(batch.created_at.to_rfc3339())
    .bind(batch.started_at.map(|dt| dt.to_rfc3339()))
    .bind(batch.ended_at.map(|dt| dt.to_rfc3339()))
    .execute(&mut *tx)
    .await?;

    for listing in listings {
        sqlx::query(
            r#"
            INSERT INTO staging_listings (
                batch_id, staging_item_id, model_raw, model_norm, device_family,
                brand, storage_gb, price_cents, vendor_code, year, cpu, review_state
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch.batch_id.to_string())
        .bind(listing.staging_item_id)
        .bind(&listing.model_raw)
        .bind(&listing.model_norm)
        .bind(&listing.device_family)
        .bind(&listing.brand)
        .bind(listing.storage_gb.map(|gb| gb as i64))
        .bind(listing.price.cents())
        .bind(&listing.vendor_code)
        .bind(listing.year)
        .bind(&listing.cpu)
        .bind(ReviewState::Pending.as_str())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Persist the mutable part of a batch header
pub async fn save_batch(pool: &SqlitePool, batch: &StagingBatch, max_wait_ms: u64) -> Result<()> {
    let batch_id = batch.batch_id.to_string();
    let status = batch.status.as_str();
    let processed = batch.progress.processed as i64;
    let total = batch.progress.total as i64;
    let started_at = batch.started_at.map(|dt| dt.to_rfc3339());
    let ended_at = batch.ended_at.map(|dt| dt.to_rfc3339());

    retry_on_lock("save_batch", max_wait_ms, || async {
        sqlx::query(
            r#"
            UPDATE staging_batches SET
                status = ?,
                progress_processed = ?,
                progress_total = ?,
                incomplete = ?,
                error_message = ?,
                started_at = ?,
                ended_at = ?
            WHERE batch_id = ?
            "#,
        )
        .bind(status)
        .bind(processed)
        .bind(total)
        .bind(batch.incomplete)
        .bind(&batch.error_message)
        .bind(&started_at)
        .bind(&ended_at)
        .bind(&batch_id)
        .execute(pool)
        .await?;

        Ok(())
    })
    .await
}

/// Persist progress counters only
pub async fn save_progress(
    pool: &SqlitePool,
    batch_id: Uuid,
    progress: &BatchProgress,
    max_wait_ms: u64,
) -> Result<()> {
    let id = batch_id.to_string();
    retry_on_lock("save_progress", max_wait_ms, || async {
        sqlx::query(
            "UPDATE staging_batches SET progress_processed = ?, progress_total = ? WHERE batch_id = ?",
        )
        .bind(progress.processed as i64)
        .bind(progress.total as i64)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<StagingBatch>> {
    let row = sqlx::query(
        r#"
        SELECT batch_id, status, channel, progress_processed, progress_total,
               incomplete, applied_count, error_message, source_batch_id,
               created_at, started_at, ended_at
        FROM staging_batches WHERE batch_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| batch_from_row(&r)).transpose()
}

/// Batches a previous process left queued or running
pub async fn list_unfinished_batches(pool: &SqlitePool) -> Result<Vec<StagingBatch>> {
    let rows = sqlx::query(
        r#"
        SELECT batch_id, status, channel, progress_processed, progress_total,
               incomplete, applied_count, error_message, source_batch_id,
               created_at, started_at, ended_at
        FROM staging_batches
        WHERE status IN ('queued', 'running')
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(batch_from_row).collect()
}

/// Mark batches left queued or running by a previous process as failed
///
/// Their stored listings and partial results are kept. Returns the ids of
/// the batches that were marked.
pub async fn cleanup_stale_batches(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let stale = list_unfinished_batches(pool).await?;
    let now = Utc::now().to_rfc3339();

    for batch in &stale {
        tracing::warn!(
            batch_id = %batch.batch_id,
            status = %batch.status,
            processed = batch.progress.processed,
            total = batch.progress.total,
            "Marking interrupted batch as failed"
        );

        sqlx::query(
            r#"
            UPDATE staging_batches SET
                status = 'failed',
                error_message = ?,
                incomplete = CASE WHEN progress_processed < progress_total THEN 1 ELSE incomplete END,
                ended_at = ?
            WHERE batch_id = ?
            "#,
        )
        .bind(INTERRUPTED_MESSAGE)
        .bind(&now)
        .bind(batch.batch_id.to_string())
        .execute(pool)
        .await?;
    }

    Ok(stale.into_iter().map(|b| b.batch_id).collect())
}

pub async fn increment_applied_count(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    applied: i64,
) -> Result<()> {
    sqlx::query("UPDATE staging_batches SET applied_count = applied_count + ? WHERE batch_id = ?")
        .bind(applied)
        .bind(batch_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn batch_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StagingBatch> {
    let batch_id: String = row.get("batch_id");
    let status: String = row.get("status");
    let source_batch_id: Option<String> = row.get("source_batch_id");
    let created_at: String = row.get("created_at");
    let processed: i64 = row.get("progress_processed");
    let total: i64 = row.get("progress_total");

    Ok(StagingBatch {
        batch_id: parse_uuid(&batch_id)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        status: status.parse::<BatchStatus>().map_err(Error::Internal)?,
        channel: row.get("channel"),
        progress: BatchProgress::new(processed.max(0) as usize, total.max(0) as usize),
        incomplete: row.get("incomplete"),
        applied_count: row.get("applied_count"),
        error_message: row.get("error_message"),
        source_batch_id: source_batch_id.as_deref().map(parse_uuid).transpose()?,
        started_at: parse_optional_timestamp("started_at", row.get("started_at"))?,
        ended_at: parse_optional_timestamp("ended_at", row.get("ended_at"))?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Failed to parse batch_id: {}", e)))
}

// ============================================================================
// Listings and review state
// ============================================================================

/// Staged listings of a batch, ordered by staging_item_id
pub async fn load_listings<'e, E>(executor: E, batch_id: Uuid) -> Result<Vec<ExternalListing>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT staging_item_id, model_raw, model_norm, device_family, brand,
               storage_gb, price_cents, vendor_code, year, cpu
        FROM staging_listings WHERE batch_id = ? ORDER BY staging_item_id
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(executor)
    .await?;

    Ok(rows.iter().map(listing_from_row).collect())
}

pub async fn load_listing(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    staging_item_id: i64,
) -> Result<Option<(ExternalListing, ReviewState)>> {
    let row = sqlx::query(
        r#"
        SELECT staging_item_id, model_raw, model_norm, device_family, brand,
               storage_gb, price_cents, vendor_code, year, cpu, review_state
        FROM staging_listings WHERE batch_id = ? AND staging_item_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .bind(staging_item_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let state: String = row.get("review_state");
            let state = state.parse::<ReviewState>().map_err(Error::Internal)?;
            Ok(Some((listing_from_row(&row), state)))
        }
        None => Ok(None),
    }
}

/// Review state of every listing of a batch
pub async fn load_review_states(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
) -> Result<HashMap<i64, ReviewState>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT staging_item_id, review_state FROM staging_listings WHERE batch_id = ?",
    )
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(id, state)| {
            state
                .parse::<ReviewState>()
                .map(|state| (id, state))
                .map_err(Error::Internal)
        })
        .collect()
}

pub async fn set_review_state(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    staging_item_id: i64,
    state: ReviewState,
) -> Result<()> {
    sqlx::query(
        "UPDATE staging_listings SET review_state = ? WHERE batch_id = ? AND staging_item_id = ?",
    )
    .bind(state.as_str())
    .bind(batch_id.to_string())
    .bind(staging_item_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn listing_from_row(row: &sqlx::sqlite::SqliteRow) -> ExternalListing {
    let storage_gb: Option<i64> = row.get("storage_gb");
    let price_cents: i64 = row.get("price_cents");
    ExternalListing {
        staging_item_id: row.get("staging_item_id"),
        model_raw: row.get("model_raw"),
        model_norm: row.get("model_norm"),
        device_family: row.get("device_family"),
        brand: row.get("brand"),
        storage_gb: storage_gb.map(|gb| gb as u32),
        price: Price::from_cents(price_cents),
        vendor_code: row.get("vendor_code"),
        year: row.get("year"),
        cpu: row.get("cpu"),
    }
}

// ============================================================================
// Match results
// ============================================================================

/// Store a result as the newest revision for its listing. Returns the revision.
pub async fn insert_match_result(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    result: &MatchResult,
) -> Result<i64> {
    let id = batch_id.to_string();
    let revision: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(revision), 0) + 1 FROM match_results
         WHERE batch_id = ? AND staging_item_id = ?",
    )
    .bind(&id)
    .bind(result.staging_item_id)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO match_results (
            batch_id, staging_item_id, revision, capacity_id, model_id,
            confidence, algorithm, needs_review, metadata, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(result.staging_item_id)
    .bind(revision)
    .bind(result.capacity_id)
    .bind(result.model_id)
    .bind(result.confidence as i64)
    .bind(result.algorithm.as_str())
    .bind(result.needs_review)
    .bind(serde_json::to_string(&result.metadata)?)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(revision)
}

/// Current (highest revision) result of every matched listing, ordered by staging_item_id
pub async fn load_current_results(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
) -> Result<Vec<MatchResult>> {
    let id = batch_id.to_string();
    let rows = sqlx::query(
        r#"
        SELECT m.staging_item_id, m.capacity_id, m.model_id, m.confidence,
               m.algorithm, m.needs_review, m.metadata
        FROM match_results m
        JOIN (
            SELECT staging_item_id, MAX(revision) AS revision
            FROM match_results WHERE batch_id = ?
            GROUP BY staging_item_id
        ) latest
          ON latest.staging_item_id = m.staging_item_id AND latest.revision = m.revision
        WHERE m.batch_id = ?
        ORDER BY m.staging_item_id
        "#,
    )
    .bind(&id)
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(result_from_row).collect()
}

pub async fn load_current_result(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    staging_item_id: i64,
) -> Result<Option<MatchResult>> {
    let row = sqlx::query(
        r#"
        SELECT staging_item_id, capacity_id, model_id, confidence,
               algorithm, needs_review, metadata
        FROM match_results
        WHERE batch_id = ? AND staging_item_id = ?
        ORDER BY revision DESC LIMIT 1
        "#,
    )
    .bind(batch_id.to_string())
    .bind(staging_item_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| result_from_row(&r)).transpose()
}

/// Number of revisions stored for a listing
pub async fn count_revisions(pool: &SqlitePool, batch_id: Uuid, staging_item_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM match_results WHERE batch_id = ? AND staging_item_id = ?",
    )
    .bind(batch_id.to_string())
    .bind(staging_item_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

fn result_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MatchResult> {
    let algorithm: String = row.get("algorithm");
    let confidence: i64 = row.get("confidence");
    let metadata: String = row.get("metadata");
    Ok(MatchResult {
        staging_item_id: row.get("staging_item_id"),
        capacity_id: row.get("capacity_id"),
        model_id: row.get("model_id"),
        confidence: confidence.clamp(0, 100) as u8,
        algorithm: algorithm.parse().map_err(Error::Internal)?,
        needs_review: row.get("needs_review"),
        metadata: serde_json::from_str(&metadata)?,
    })
}

// ============================================================================
// Change records
// ============================================================================

pub async fn insert_changes(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    changes: &[ChangeRecord],
) -> Result<()> {
    let id = batch_id.to_string();
    for change in changes {
        sqlx::query(
            r#"
            INSERT INTO staging_changes (
                batch_id, staging_item_id, kind, modelo_norm, capacity_id,
                before_cents, after_cents, delta_cents, confidence, algorithm
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(change.staging_item_id)
        .bind(change.kind.as_str())
        .bind(&change.modelo_norm)
        .bind(change.capacity_id)
        .bind(change.before.map(|p| p.cents()))
        .bind(change.after.map(|p| p.cents()))
        .bind(change.delta.map(|p| p.cents()))
        .bind(change.confidence as i64)
        .bind(change.algorithm.map(|a| a.as_str()))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Retire every change that has not been applied yet. Returns how many were retired.
pub async fn supersede_pending_changes(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE staging_changes SET superseded = 1
         WHERE batch_id = ? AND superseded = 0 AND applied = 0",
    )
    .bind(batch_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Live change records of a batch: listing records by staging_item_id, then
/// DELETE records by capacity id
pub async fn load_changes(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<Vec<StoredChange>> {
    let rows = sqlx::query(
        r#"
        SELECT id, staging_item_id, kind, modelo_norm, capacity_id, before_cents,
               after_cents, delta_cents, confidence, algorithm, applied
        FROM staging_changes
        WHERE batch_id = ? AND superseded = 0
        ORDER BY (staging_item_id IS NULL), staging_item_id, capacity_id, id
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(change_from_row).collect()
}

/// Flag a live change as applied. Returns false if another caller got there
/// first or a review decision superseded the record.
pub async fn mark_change_applied(conn: &mut SqliteConnection, change_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE staging_changes SET applied = 1, applied_at = ?
         WHERE id = ? AND applied = 0 AND superseded = 0",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(change_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

fn change_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredChange> {
    let kind: String = row.get("kind");
    let algorithm: Option<String> = row.get("algorithm");
    let confidence: i64 = row.get("confidence");
    let before: Option<i64> = row.get("before_cents");
    let after: Option<i64> = row.get("after_cents");
    let delta: Option<i64> = row.get("delta_cents");

    Ok(StoredChange {
        id: row.get("id"),
        record: ChangeRecord {
            staging_item_id: row.get("staging_item_id"),
            kind: kind.parse().map_err(Error::Internal)?,
            modelo_norm: row.get("modelo_norm"),
            capacity_id: row.get("capacity_id"),
            before: before.map(Price::from_cents),
            after: after.map(Price::from_cents),
            delta: delta.map(Price::from_cents),
            confidence: confidence.clamp(0, 100) as u8,
            algorithm: algorithm
                .map(|a| a.parse::<MatchAlgorithm>())
                .transpose()
                .map_err(Error::Internal)?,
        },
        applied: row.get("applied"),
    })
}

// ============================================================================
// Review decisions
// ============================================================================

pub async fn insert_decision(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    decision: &ReviewDecision,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO review_decisions (
            batch_id, staging_item_id, decision, target_capacity_id, notes, decided_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch_id.to_string())
    .bind(decision.staging_item_id)
    .bind(decision.decision.as_str())
    .bind(decision.target_capacity_id)
    .bind(&decision.notes)
    .bind(decision.decided_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Listings rejected in review; they never produce a change
pub async fn rejected_items(conn: &mut SqliteConnection, batch_id: Uuid) -> Result<HashSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT staging_item_id FROM review_decisions WHERE batch_id = ? AND decision = 'reject'",
    )
    .bind(batch_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids.into_iter().collect())
}

/// Decisions recorded on a batch, oldest first
pub async fn load_decisions(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<ReviewDecision>> {
    let rows = sqlx::query(
        r#"
        SELECT staging_item_id, decision, target_capacity_id, notes, decided_at
        FROM review_decisions WHERE batch_id = ? ORDER BY id
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<ReviewDecision> {
            let decision: String = row.get("decision");
            let decided_at: String = row.get("decided_at");
            Ok(ReviewDecision {
                staging_item_id: row.get("staging_item_id"),
                decision: decision.parse().map_err(Error::Internal)?,
                target_capacity_id: row.get("target_capacity_id"),
                notes: row.get("notes"),
                decided_at: parse_timestamp("decided_at", &decided_at)?,
            })
        })
        .collect()
}

// ============================================================================
// Batch logs
// ============================================================================

/// Append a log line; sequence numbers start at 1 and have no gaps
pub async fn append_log(
    pool: &SqlitePool,
    batch_id: Uuid,
    level: &str,
    message: &str,
    max_wait_ms: u64,
) -> Result<()> {
    let id = batch_id.to_string();
    let now = Utc::now().to_rfc3339();

    retry_on_lock("append_log", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO batch_logs (batch_id, seq, level, message, logged_at)
            SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4
            FROM batch_logs WHERE batch_id = ?1
            "#,
        )
        .bind(&id)
        .bind(level)
        .bind(message)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Log lines with `seq > since`, oldest first
pub async fn load_logs(pool: &SqlitePool, batch_id: Uuid, since: i64) -> Result<Vec<BatchLogLine>> {
    let rows = sqlx::query(
        "SELECT seq, level, message, logged_at FROM batch_logs
         WHERE batch_id = ? AND seq > ? ORDER BY seq",
    )
    .bind(batch_id.to_string())
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<BatchLogLine> {
            let logged_at: String = row.get("logged_at");
            Ok(BatchLogLine {
                seq: row.get("seq"),
                level: row.get("level"),
                message: row.get("message"),
                logged_at: parse_timestamp("logged_at", &logged_at)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, FeedListing};
    use serde_json::json;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn listing(id: i64, model: &str) -> ExternalListing {
        ExternalListing::from_feed(
            id,
            FeedListing {
                modelo_raw: model.to_string(),
                modelo_norm: model.to_string(),
                tipo: "Smartphone".to_string(),
                marca: "Apple".to_string(),
                almacenamiento_gb: Some(128),
                precio_b2b: Price::from_units(450.0),
                vendor_code: None,
                year: None,
                cpu: None,
            },
        )
    }

    async fn staged(pool: &SqlitePool) -> StagingBatch {
        let batch = StagingBatch::new("b2b".to_string(), 2, None);
        insert_batch(pool, &batch, &[listing(1, "iPhone 13"), listing(2, "iPhone 12")])
            .await
            .unwrap();
        batch
    }

    #[tokio::test]
    async fn batch_round_trip_and_status_update() {
        let pool = setup().await;
        let mut batch = staged(&pool).await;

        batch.status = BatchStatus::Running;
        batch.started_at = Some(Utc::now());
        batch.progress = BatchProgress::new(1, 2);
        save_batch(&pool, &batch, 5000).await.unwrap();

        let loaded = load_batch(&pool, batch.batch_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Running);
        assert_eq!(loaded.progress.processed, 1);
        assert_eq!(load_listings(&pool, batch.batch_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn newest_revision_is_current() {
        let pool = setup().await;
        let batch = staged(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let first = MatchResult {
            staging_item_id: 1,
            capacity_id: Some(7),
            model_id: Some(3),
            confidence: 65,
            algorithm: MatchAlgorithm::Fuzzy,
            needs_review: true,
            metadata: json!({}),
        };
        assert_eq!(insert_match_result(&mut conn, batch.batch_id, &first).await.unwrap(), 1);

        let corrected = MatchResult {
            capacity_id: Some(9),
            confidence: 90,
            needs_review: false,
            ..first.clone()
        };
        assert_eq!(insert_match_result(&mut conn, batch.batch_id, &corrected).await.unwrap(), 2);

        let current = load_current_results(&mut conn, batch.batch_id).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].capacity_id, Some(9));
        drop(conn);
        assert_eq!(count_revisions(&pool, batch.batch_id, 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn changes_ordered_with_deletes_last() {
        let pool = setup().await;
        let batch = staged(&pool).await;
        let mut conn = pool.acquire().await.unwrap();

        let change = |item: Option<i64>, kind: ChangeKind, capacity_id: i64| ChangeRecord {
            staging_item_id: item,
            kind,
            modelo_norm: "iPhone 13".to_string(),
            capacity_id,
            before: None,
            after: Some(Price::from_cents(100)),
            delta: None,
            confidence: 90,
            algorithm: Some(MatchAlgorithm::Exact),
        };
        insert_changes(
            &mut conn,
            batch.batch_id,
            &[
                change(None, ChangeKind::Delete, 1),
                change(Some(2), ChangeKind::Insert, 5),
                change(Some(1), ChangeKind::Insert, 9),
            ],
        )
        .await
        .unwrap();

        let changes = load_changes(&mut conn, batch.batch_id).await.unwrap();
        let items: Vec<Option<i64>> = changes.iter().map(|c| c.record.staging_item_id).collect();
        assert_eq!(items, vec![Some(1), Some(2), None]);

        assert!(mark_change_applied(&mut conn, changes[0].id).await.unwrap());
        assert!(!mark_change_applied(&mut conn, changes[0].id).await.unwrap());

        assert_eq!(supersede_pending_changes(&mut conn, batch.batch_id).await.unwrap(), 2);
        let remaining = load_changes(&mut conn, batch.batch_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].applied);
    }

    #[tokio::test]
    async fn logs_are_sequenced() {
        let pool = setup().await;
        let batch = staged(&pool).await;
        for message in ["started", "matched 1", "finished"] {
            append_log(&pool, batch.batch_id, "INFO", message, 5000)
                .await
                .unwrap();
        }

        let all = load_logs(&pool, batch.batch_id, 0).await.unwrap();
        assert_eq!(all.iter().map(|l| l.seq).collect::<Vec<_>>(), vec![1, 2, 3]);

        let tail = load_logs(&pool, batch.batch_id, 2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "finished");
    }

    #[tokio::test]
    async fn stale_batches_are_failed_on_cleanup() {
        let pool = setup().await;
        let mut batch = staged(&pool).await;
        batch.status = BatchStatus::Running;
        batch.progress = BatchProgress::new(1, 2);
        save_batch(&pool, &batch, 5000).await.unwrap();

        let cleaned = cleanup_stale_batches(&pool).await.unwrap();
        assert_eq!(cleaned, vec![batch.batch_id]);

        let loaded = load_batch(&pool, batch.batch_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Failed);
        assert!(loaded.incomplete);
        assert_eq!(loaded.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    }
}
