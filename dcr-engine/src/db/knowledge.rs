//! Knowledge Base persistence
//!
//! One current entry per signature plus an append-only history of every
//! mutation. Entries are overwritten in place; history rows are never deleted.

use chrono::{DateTime, Utc};
use dcr_common::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp};
use crate::models::{KnowledgeEntry, KnowledgeEvent, KnowledgeMetrics};

/// SQLite bound-parameter budget per IN (...) query
const SIGNATURE_CHUNK: usize = 500;

/// One row of the knowledge history
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeHistoryRecord {
    pub signature: String,
    pub capacity_id: i64,
    pub event: KnowledgeEvent,
    pub confidence_before: Option<u8>,
    pub confidence_after: u8,
    pub batch_id: Option<Uuid>,
    pub staging_item_id: Option<i64>,
}

pub async fn get_entry(
    conn: &mut SqliteConnection,
    signature: &str,
) -> Result<Option<KnowledgeEntry>> {
    let row = sqlx::query(
        r#"
        SELECT signature, capacity_id, confidence, times_confirmed, times_corrected,
               user_validated, algorithm, last_confirmed_at, last_corrected_at, updated_at
        FROM knowledge_entries WHERE signature = ?
        "#,
    )
    .bind(signature)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| entry_from_row(&r)).transpose()
}

/// Entries for a set of signatures (missing signatures are simply absent)
pub async fn load_entries(pool: &SqlitePool, signatures: &[String]) -> Result<Vec<KnowledgeEntry>> {
    let mut entries = Vec::new();

    for chunk in signatures.chunks(SIGNATURE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            r#"
            SELECT signature, capacity_id, confidence, times_confirmed, times_corrected,
                   user_validated, algorithm, last_confirmed_at, last_corrected_at, updated_at
            FROM knowledge_entries WHERE signature IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for signature in chunk {
            query = query.bind(signature);
        }

        for row in query.fetch_all(pool).await? {
            entries.push(entry_from_row(&row)?);
        }
    }

    Ok(entries)
}

pub async fn upsert_entry(conn: &mut SqliteConnection, entry: &KnowledgeEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO knowledge_entries (
            signature, capacity_id, confidence, times_confirmed, times_corrected,
            user_validated, algorithm, last_confirmed_at, last_corrected_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(signature) DO UPDATE SET
            capacity_id = excluded.capacity_id,
            confidence = excluded.confidence,
            times_confirmed = excluded.times_confirmed,
            times_corrected = excluded.times_corrected,
            user_validated = excluded.user_validated,
            algorithm = excluded.algorithm,
            last_confirmed_at = excluded.last_confirmed_at,
            last_corrected_at = excluded.last_corrected_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.signature)
    .bind(entry.capacity_id)
    .bind(entry.confidence as i64)
    .bind(entry.times_confirmed as i64)
    .bind(entry.times_corrected as i64)
    .bind(entry.user_validated)
    .bind(entry.algorithm.as_str())
    .bind(entry.last_confirmed_at.map(|dt| dt.to_rfc3339()))
    .bind(entry.last_corrected_at.map(|dt| dt.to_rfc3339()))
    .bind(entry.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn append_history(
    conn: &mut SqliteConnection,
    record: &KnowledgeHistoryRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO knowledge_history (
            signature, capacity_id, event, confidence_before, confidence_after,
            batch_id, staging_item_id, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.signature)
    .bind(record.capacity_id)
    .bind(record.event.as_str())
    .bind(record.confidence_before.map(|c| c as i64))
    .bind(record.confidence_after as i64)
    .bind(record.batch_id.map(|id| id.to_string()))
    .bind(record.staging_item_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// History of one signature, oldest first
pub async fn history_for(
    pool: &SqlitePool,
    signature: &str,
) -> Result<Vec<(KnowledgeHistoryRecord, DateTime<Utc>)>> {
    let rows = sqlx::query(
        r#"
        SELECT signature, capacity_id, event, confidence_before, confidence_after,
               batch_id, staging_item_id, recorded_at
        FROM knowledge_history WHERE signature = ? ORDER BY id
        "#,
    )
    .bind(signature)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<(KnowledgeHistoryRecord, DateTime<Utc>)> {
            let event: String = row.get("event");
            let event: KnowledgeEvent = event.parse().map_err(Error::Internal)?;
            let batch_id: Option<String> = row.get("batch_id");
            let batch_id = batch_id
                .map(|id| Uuid::parse_str(&id))
                .transpose()
                .map_err(|e| Error::Internal(format!("Failed to parse batch_id: {}", e)))?;
            let before: Option<i64> = row.get("confidence_before");
            let after: i64 = row.get("confidence_after");
            let recorded_at: String = row.get("recorded_at");

            Ok((
                KnowledgeHistoryRecord {
                    signature: row.get("signature"),
                    capacity_id: row.get("capacity_id"),
                    event,
                    confidence_before: before.map(|c| c as u8),
                    confidence_after: after as u8,
                    batch_id,
                    staging_item_id: row.get("staging_item_id"),
                },
                parse_timestamp("recorded_at", &recorded_at)?,
            ))
        })
        .collect()
}

/// Sum of confirmations per catalog model, used to break fuzzy ties
pub async fn confirmations_by_model(pool: &SqlitePool) -> Result<HashMap<i64, u64>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT c.model_id, SUM(k.times_confirmed)
        FROM knowledge_entries k
        JOIN catalog_capacities c ON c.id = k.capacity_id
        GROUP BY c.model_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(model_id, total)| (model_id, total.max(0) as u64))
        .collect())
}

/// Knowledge Base aggregates
pub async fn metrics(pool: &SqlitePool) -> Result<KnowledgeMetrics> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS entries,
               COALESCE(SUM(user_validated), 0) AS user_validated,
               COALESCE(AVG(confidence), 0.0) AS avg_confidence,
               COALESCE(SUM(times_confirmed), 0) AS confirmations,
               COALESCE(SUM(times_corrected), 0) AS corrections
        FROM knowledge_entries
        "#,
    )
    .fetch_one(pool)
    .await?;

    let entries: i64 = row.get("entries");
    let user_validated: i64 = row.get("user_validated");
    let confirmations: i64 = row.get("confirmations");
    let corrections: i64 = row.get("corrections");

    Ok(KnowledgeMetrics {
        entries: entries as usize,
        user_validated: user_validated as usize,
        avg_confidence: row.get("avg_confidence"),
        total_confirmations: confirmations as u64,
        total_corrections: corrections as u64,
    })
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeEntry> {
    let algorithm: String = row.get("algorithm");
    let algorithm = algorithm.parse().map_err(Error::Internal)?;
    let confidence: i64 = row.get("confidence");
    let times_confirmed: i64 = row.get("times_confirmed");
    let times_corrected: i64 = row.get("times_corrected");
    let updated_at: String = row.get("updated_at");

    Ok(KnowledgeEntry {
        signature: row.get("signature"),
        capacity_id: row.get("capacity_id"),
        confidence: confidence.clamp(0, 100) as u8,
        times_confirmed: times_confirmed.max(0) as u32,
        times_corrected: times_corrected.max(0) as u32,
        user_validated: row.get("user_validated"),
        algorithm,
        last_confirmed_at: parse_optional_timestamp(
            "last_confirmed_at",
            row.get("last_confirmed_at"),
        )?,
        last_corrected_at: parse_optional_timestamp(
            "last_corrected_at",
            row.get("last_corrected_at"),
        )?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}
