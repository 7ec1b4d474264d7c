//! Knowledge Base: learned signature → capacity mappings
//!
//! The matching engine reads a bounded in-memory [`KnowledgeCache`] loaded at
//! the start of a run. Only the review workflow and price application write
//! to the Knowledge Base, each write landing in the caller's transaction
//! together with a history row.

use chrono::{DateTime, Duration, Utc};
use dcr_common::Result;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::db;
use crate::db::knowledge::KnowledgeHistoryRecord;
use crate::models::{KnowledgeEntry, KnowledgeEvent, MatchAlgorithm};

/// Cached matches of user-validated entries never score below this
pub const USER_VALIDATED_FLOOR: u8 = 85;

/// Confidence floor of an entry after a correction
pub const CORRECTION_FLOOR: u8 = 90;

/// Learned confidence never reaches certainty
pub const MAX_LEARNED_CONFIDENCE: u8 = 99;

/// Share of the remaining distance to 100 kept after each confirmation
const CONFIRMATION_RETENTION: f64 = 0.8;

/// Confidence earned by an entry from its history
///
/// `seed + (100 - seed) * (1 - 0.8^confirmed)`, halved once per correction,
/// clamped to 0-99.
pub fn learned_confidence(seed: u8, times_confirmed: u32, times_corrected: u32) -> u8 {
    let seed = f64::from(seed.min(100));
    let grown = seed + (100.0 - seed) * (1.0 - CONFIRMATION_RETENTION.powi(times_confirmed as i32));
    let penalized = grown / 2f64.powi(times_corrected.min(32) as i32);
    penalized.round().clamp(0.0, f64::from(MAX_LEARNED_CONFIDENCE)) as u8
}

/// Whether the cached phase may use an entry
///
/// Entries never corrected are always eligible; corrected ones only once the
/// last correction is older than the staleness window.
pub fn is_eligible(entry: &KnowledgeEntry, now: DateTime<Utc>, staleness_window: Duration) -> bool {
    if entry.times_corrected == 0 {
        return true;
    }
    match entry.last_corrected_at {
        Some(corrected_at) => now - corrected_at > staleness_window,
        None => true,
    }
}

/// Confidence reported by a cached match
pub fn cached_confidence(entry: &KnowledgeEntry) -> u8 {
    if entry.user_validated {
        entry.confidence.max(USER_VALIDATED_FLOOR)
    } else {
        entry.confidence
    }
}

/// New state of an entry after a human approved `capacity_id` for its signature
pub fn confirmed_entry(
    previous: Option<&KnowledgeEntry>,
    signature: &str,
    capacity_id: i64,
    seed: u8,
    algorithm: MatchAlgorithm,
    now: DateTime<Utc>,
) -> KnowledgeEntry {
    let (times_confirmed, times_corrected, previous_confidence, algorithm) = match previous {
        Some(prev) if prev.capacity_id == capacity_id => (
            prev.times_confirmed.saturating_add(1),
            prev.times_corrected,
            prev.confidence,
            prev.algorithm,
        ),
        Some(prev) => (1, prev.times_corrected, prev.confidence, algorithm),
        None => (1, 0, 0, algorithm),
    };

    let learned = learned_confidence(seed, times_confirmed, times_corrected);
    KnowledgeEntry {
        signature: signature.to_string(),
        capacity_id,
        confidence: previous_confidence.max(learned),
        times_confirmed,
        times_corrected,
        user_validated: true,
        algorithm,
        last_confirmed_at: Some(now),
        last_corrected_at: previous.and_then(|p| p.last_corrected_at),
        updated_at: now,
    }
}

/// New state of an entry after a human pointed its signature at `capacity_id`
pub fn corrected_entry(
    previous: Option<&KnowledgeEntry>,
    signature: &str,
    capacity_id: i64,
    algorithm: MatchAlgorithm,
    now: DateTime<Utc>,
) -> KnowledgeEntry {
    let (times_confirmed, times_corrected, seed) = match previous {
        Some(prev) => (
            prev.times_confirmed,
            prev.times_corrected.saturating_add(1),
            prev.confidence,
        ),
        None => (0, 1, CORRECTION_FLOOR),
    };

    let learned = learned_confidence(seed, times_confirmed, times_corrected);
    KnowledgeEntry {
        signature: signature.to_string(),
        capacity_id,
        confidence: learned.max(CORRECTION_FLOOR),
        times_confirmed,
        times_corrected,
        user_validated: true,
        algorithm: previous.map(|p| p.algorithm).unwrap_or(algorithm),
        last_confirmed_at: previous.and_then(|p| p.last_confirmed_at),
        last_corrected_at: Some(now),
        updated_at: now,
    }
}

/// Entry recorded the first time a mapping is learned without human review
pub fn learned_entry(
    signature: &str,
    capacity_id: i64,
    seed: u8,
    algorithm: MatchAlgorithm,
    now: DateTime<Utc>,
) -> KnowledgeEntry {
    KnowledgeEntry {
        signature: signature.to_string(),
        capacity_id,
        confidence: learned_confidence(seed, 0, 0),
        times_confirmed: 0,
        times_corrected: 0,
        user_validated: false,
        algorithm,
        last_confirmed_at: None,
        last_corrected_at: None,
        updated_at: now,
    }
}

/// Where a Knowledge Base write came from
#[derive(Debug, Clone, Copy)]
pub struct WriteOrigin {
    pub batch_id: Uuid,
    pub staging_item_id: i64,
}

/// Approve: confirm the mapping. Confidence never decreases.
pub async fn record_confirmation(
    conn: &mut SqliteConnection,
    signature: &str,
    capacity_id: i64,
    seed: u8,
    algorithm: MatchAlgorithm,
    origin: WriteOrigin,
) -> Result<KnowledgeEntry> {
    let previous = db::knowledge::get_entry(conn, signature).await?;
    let entry = confirmed_entry(previous.as_ref(), signature, capacity_id, seed, algorithm, Utc::now());
    write(conn, previous.as_ref(), &entry, KnowledgeEvent::Confirmed, origin).await?;
    Ok(entry)
}

/// Correct or create_new: repoint the signature, confidence at least 90
pub async fn record_correction(
    conn: &mut SqliteConnection,
    signature: &str,
    capacity_id: i64,
    algorithm: MatchAlgorithm,
    event: KnowledgeEvent,
    origin: WriteOrigin,
) -> Result<KnowledgeEntry> {
    let previous = db::knowledge::get_entry(conn, signature).await?;
    let entry = corrected_entry(previous.as_ref(), signature, capacity_id, algorithm, Utc::now());
    write(conn, previous.as_ref(), &entry, event, origin).await?;
    Ok(entry)
}

/// Record a mapping the Knowledge Base does not know yet; existing entries
/// are left untouched. Returns the new entry when one was written.
pub async fn learn_if_absent(
    conn: &mut SqliteConnection,
    signature: &str,
    capacity_id: i64,
    seed: u8,
    algorithm: MatchAlgorithm,
    event: KnowledgeEvent,
    origin: WriteOrigin,
) -> Result<Option<KnowledgeEntry>> {
    if db::knowledge::get_entry(conn, signature).await?.is_some() {
        return Ok(None);
    }
    let entry = learned_entry(signature, capacity_id, seed, algorithm, Utc::now());
    write(conn, None, &entry, event, origin).await?;
    Ok(Some(entry))
}

async fn write(
    conn: &mut SqliteConnection,
    previous: Option<&KnowledgeEntry>,
    entry: &KnowledgeEntry,
    event: KnowledgeEvent,
    origin: WriteOrigin,
) -> Result<()> {
    db::knowledge::upsert_entry(conn, entry).await?;
    db::knowledge::append_history(
        conn,
        &KnowledgeHistoryRecord {
            signature: entry.signature.clone(),
            capacity_id: entry.capacity_id,
            event,
            confidence_before: previous.map(|p| p.confidence),
            confidence_after: entry.confidence,
            batch_id: Some(origin.batch_id),
            staging_item_id: Some(origin.staging_item_id),
        },
    )
    .await?;

    tracing::debug!(
        signature = %entry.signature,
        capacity_id = entry.capacity_id,
        event = event.as_str(),
        confidence = entry.confidence,
        "Knowledge Base updated"
    );
    Ok(())
}

/// Bounded signature → entry cache
///
/// Holds at most `capacity` entries; the oldest insertion is evicted first.
#[derive(Debug, Clone)]
pub struct KnowledgeCache {
    capacity: usize,
    entries: HashMap<String, KnowledgeEntry>,
    order: VecDeque<String>,
}

impl KnowledgeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Load the entries for a run's signatures
    pub async fn load(pool: &SqlitePool, signatures: &[String], capacity: usize) -> Result<Self> {
        let mut unique: Vec<String> = signatures.to_vec();
        unique.sort();
        unique.dedup();

        let mut cache = Self::new(capacity);
        for entry in db::knowledge::load_entries(pool, &unique).await? {
            cache.insert(entry);
        }
        tracing::debug!(
            requested = unique.len(),
            cached = cache.len(),
            "Knowledge cache loaded"
        );
        Ok(cache)
    }

    pub fn get(&self, signature: &str) -> Option<&KnowledgeEntry> {
        self.entries.get(signature)
    }

    pub fn insert(&mut self, entry: KnowledgeEntry) {
        if self.entries.contains_key(&entry.signature) {
            self.entries.insert(entry.signature.clone(), entry);
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(entry.signature.clone());
        self.entries.insert(entry.signature.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Knowledge Base aggregates
pub async fn metrics(pool: &SqlitePool) -> Result<crate::models::KnowledgeMetrics> {
    db::knowledge::metrics(pool).await
}
