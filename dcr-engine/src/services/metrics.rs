//! Batch and Knowledge Base metrics, computed on read
//!
//! Nothing here is maintained as a running counter.

use dcr_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::db;
use crate::models::{
    ExternalListing, KnowledgeMetrics, MatchResult, ReviewDecision, ReviewState,
};

/// Matches at or above this confidence count as high-confidence
pub const HIGH_CONFIDENCE: u8 = 85;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BrandStats {
    pub listings: usize,
    pub matched: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchMetrics {
    pub batch_id: Uuid,
    pub total_listings: usize,
    pub matched: usize,
    pub failed: usize,
    /// Average confidence over matched listings
    pub avg_confidence: f64,
    /// Share of all listings matched with confidence >= 85, in percent
    pub high_confidence_pct: f64,
    /// Listings still waiting in the review queue
    pub pending_review: usize,
    pub auto_mapped: usize,
    pub by_algorithm: BTreeMap<String, usize>,
    pub by_brand: BTreeMap<String, BrandStats>,
    pub decisions: BTreeMap<String, usize>,
    pub knowledge: KnowledgeMetrics,
}

pub async fn batch_metrics(pool: &SqlitePool, batch_id: Uuid) -> Result<BatchMetrics> {
    if db::batches::load_batch(pool, batch_id).await?.is_none() {
        return Err(Error::NotFound(format!("batch {}", batch_id)));
    }

    let listings = db::batches::load_listings(pool, batch_id).await?;
    let (results, states) = {
        let mut conn = pool.acquire().await?;
        let results = db::batches::load_current_results(&mut conn, batch_id).await?;
        let states = db::batches::load_review_states(&mut conn, batch_id).await?;
        (results, states)
    };
    let decisions = db::batches::load_decisions(pool, batch_id).await?;

    let mut metrics = compute(batch_id, &listings, &results, &states, &decisions);
    metrics.knowledge = db::knowledge::metrics(pool).await?;
    Ok(metrics)
}

fn compute(
    batch_id: Uuid,
    listings: &[ExternalListing],
    results: &[MatchResult],
    states: &HashMap<i64, ReviewState>,
    decisions: &[ReviewDecision],
) -> BatchMetrics {
    let results: HashMap<i64, &MatchResult> =
        results.iter().map(|r| (r.staging_item_id, r)).collect();

    let mut metrics = BatchMetrics {
        batch_id,
        total_listings: listings.len(),
        ..Default::default()
    };
    let mut confidence_sum = 0u64;
    let mut high_confidence = 0usize;

    for listing in listings {
        let brand = listing.brand.trim().to_string();
        let stats = metrics.by_brand.entry(brand).or_default();
        stats.listings += 1;

        let Some(result) = results.get(&listing.staging_item_id) else {
            continue;
        };
        *metrics
            .by_algorithm
            .entry(result.algorithm.to_string())
            .or_default() += 1;

        if result.is_mapped() {
            stats.matched += 1;
            metrics.matched += 1;
            confidence_sum += u64::from(result.confidence);
            if result.confidence >= HIGH_CONFIDENCE {
                high_confidence += 1;
            }
        } else {
            metrics.failed += 1;
        }

        match states.get(&listing.staging_item_id) {
            Some(ReviewState::Pending) if result.needs_review => metrics.pending_review += 1,
            Some(ReviewState::AutoMapped) => metrics.auto_mapped += 1,
            _ => {}
        }
    }

    for stats in metrics.by_brand.values_mut() {
        stats.success_rate = percentage(stats.matched, stats.listings);
    }
    if metrics.matched > 0 {
        metrics.avg_confidence = confidence_sum as f64 / metrics.matched as f64;
    }
    metrics.high_confidence_pct = percentage(high_confidence, metrics.total_listings);

    for decision in decisions {
        *metrics
            .decisions
            .entry(decision.decision.to_string())
            .or_default() += 1;
    }

    metrics
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
