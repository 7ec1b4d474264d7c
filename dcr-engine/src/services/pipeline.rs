//! Staging & diff pipeline
//!
//! Stages a feed as a batch, matches every listing on a bounded worker pool,
//! derives the change set against current catalog prices and applies
//! selected changes under per-capacity locks.

use chrono::Utc;
use dcr_common::events::{EventBus, ReconEvent};
use dcr_common::{Error, Result};
use futures::future;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::diff::{self, ChangeSet, DiffOptions};
use super::knowledge_base::{self, KnowledgeCache, WriteOrigin};
use super::matching::normalize::signature;
use super::matching::{CatalogSnapshot, MatchContext, MatchingEngine};
use crate::config::EngineConfig;
use crate::db;
use crate::db::batches::StoredChange;
use crate::models::{
    validate_feed, BatchProgress, BatchStatus, ChangeKind, ChangeRecord, DiffReport, DiffSummary,
    ExternalListing, FeedListing, KnowledgeEvent, MatchAlgorithm, MatchResult, Price,
    StagingBatch,
};
use crate::utils::{retry_on_lock, KeyedLocks};

/// Progress is persisted roughly this many times per run
const PROGRESS_UPDATES_PER_RUN: usize = 20;

const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Which live change records an apply call may write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyFilter {
    #[serde(default, rename = "aplicar_inserciones")]
    pub inserts: bool,
    #[serde(default, rename = "aplicar_actualizaciones")]
    pub updates: bool,
    #[serde(default, rename = "aplicar_eliminaciones")]
    pub deletes: bool,
    /// Records below this confidence are skipped
    #[serde(default)]
    pub confidence_threshold: u8,
    /// Restrict to these listings (DELETE records have no listing and are excluded)
    #[serde(default)]
    pub staging_item_ids: Option<Vec<i64>>,
}

impl ApplyFilter {
    /// Every kind, any confidence
    pub fn all() -> Self {
        Self {
            inserts: true,
            updates: true,
            deletes: true,
            confidence_threshold: 0,
            staging_item_ids: None,
        }
    }

    /// The change of a single listing, whatever its kind
    pub fn single(staging_item_id: i64) -> Self {
        Self {
            staging_item_ids: Some(vec![staging_item_id]),
            ..Self::all()
        }
    }

    fn selects_kind(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Insert => self.inserts,
            ChangeKind::Update => self.updates,
            ChangeKind::Delete => self.deletes,
            ChangeKind::Noop => false,
        }
    }

    fn selects_item(&self, staging_item_id: Option<i64>) -> bool {
        match (&self.staging_item_ids, staging_item_id) {
            (None, _) => true,
            (Some(ids), Some(id)) => ids.contains(&id),
            (Some(_), None) => false,
        }
    }
}

/// A change skipped because the catalog moved since the diff was computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyConflict {
    pub staging_item_id: Option<i64>,
    #[serde(rename = "capacidad_id")]
    pub capacity_id: i64,
    pub kind: ChangeKind,
    pub expected: Option<Price>,
    pub actual: Option<Price>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: usize,
    /// Selected records left alone: already applied, rejected or below the threshold
    pub skipped: usize,
    pub conflicts: Vec<ApplyConflict>,
}

enum ApplyOutcome {
    Applied,
    AlreadyApplied,
    Conflict(ApplyConflict),
}

/// Per-run matching counters
#[derive(Debug, Default)]
struct MatchTally {
    processed: usize,
    needs_review: usize,
    by_algorithm: BTreeMap<MatchAlgorithm, usize>,
}

impl MatchTally {
    fn record(&mut self, result: &MatchResult) {
        self.processed += 1;
        if result.needs_review {
            self.needs_review += 1;
        }
        *self.by_algorithm.entry(result.algorithm).or_default() += 1;
    }

    fn describe(&self) -> String {
        let phases: Vec<String> = self
            .by_algorithm
            .iter()
            .map(|(algorithm, count)| format!("{}={}", algorithm, count))
            .collect();
        format!(
            "{} listings matched ({}), {} need review",
            self.processed,
            phases.join(", "),
            self.needs_review
        )
    }
}

pub struct StagingPipeline {
    db: SqlitePool,
    config: Arc<EngineConfig>,
    event_bus: EventBus,
    capacity_locks: Arc<KeyedLocks<i64>>,
}

impl StagingPipeline {
    pub fn new(
        db: SqlitePool,
        config: Arc<EngineConfig>,
        event_bus: EventBus,
        capacity_locks: Arc<KeyedLocks<i64>>,
    ) -> Self {
        Self {
            db,
            config,
            event_bus,
            capacity_locks,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Validate a feed and persist it as a queued batch
    ///
    /// Nothing is stored when any listing is invalid.
    pub async fn stage_batch(
        &self,
        feed: Vec<FeedListing>,
        channel: Option<String>,
    ) -> Result<StagingBatch> {
        if let Err(problems) = validate_feed(&feed) {
            return Err(Error::InvalidInput(problems.join("; ")));
        }

        let listings: Vec<ExternalListing> = feed
            .into_iter()
            .enumerate()
            .map(|(index, listing)| ExternalListing::from_feed(index as i64 + 1, listing))
            .collect();

        self.stage_listings(listings, channel, None).await
    }

    /// Stage the stored listings of an existing batch again (remap)
    pub async fn stage_replay(&self, source_batch_id: Uuid) -> Result<StagingBatch> {
        let source = self.require_batch(source_batch_id).await?;
        let listings = db::batches::load_listings(&self.db, source_batch_id).await?;
        if listings.is_empty() {
            return Err(Error::InvalidInput(format!(
                "batch {} has no stored listings to replay",
                source_batch_id
            )));
        }

        self.stage_listings(listings, Some(source.channel), Some(source_batch_id))
            .await
    }

    async fn stage_listings(
        &self,
        listings: Vec<ExternalListing>,
        channel: Option<String>,
        source_batch_id: Option<Uuid>,
    ) -> Result<StagingBatch> {
        let channel = channel
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.config.target_channel.clone());

        let batch = StagingBatch::new(channel, listings.len(), source_batch_id);
        db::batches::insert_batch(&self.db, &batch, &listings).await?;

        tracing::info!(
            batch_id = %batch.batch_id,
            listings = listings.len(),
            channel = %batch.channel,
            source_batch_id = ?source_batch_id,
            "Staged batch"
        );
        let message = match source_batch_id {
            Some(source) => format!("Staged {} listings replayed from batch {}", listings.len(), source),
            None => format!("Staged {} listings", listings.len()),
        };
        self.log(batch.batch_id, "info", &message).await;

        Ok(batch)
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Match every listing of a queued batch and derive its change set
    ///
    /// Returns the batch in its terminal state. A failure while matching is
    /// recorded on the batch (status `failed`, partial results kept) rather
    /// than returned; `Err` means the batch could not be started or its
    /// final state could not be persisted.
    pub async fn run_batch(
        &self,
        batch_id: Uuid,
        cancel_token: CancellationToken,
    ) -> Result<StagingBatch> {
        let mut batch = self.require_batch(batch_id).await?;
        if !batch.status.can_transition_to(BatchStatus::Running) {
            return Err(Error::InvalidInput(format!(
                "batch {} is {} and cannot be run",
                batch_id, batch.status
            )));
        }

        batch.status = BatchStatus::Running;
        batch.started_at = Some(Utc::now());
        db::batches::save_batch(&self.db, &batch, self.config.db_max_lock_wait_ms).await?;

        self.event_bus.emit_lossy(ReconEvent::BatchStarted {
            batch_id,
            total_listings: batch.progress.total,
            timestamp: Utc::now(),
        });
        tracing::info!(
            batch_id = %batch_id,
            listings = batch.progress.total,
            workers = self.config.worker_count,
            "Batch started"
        );
        self.log(
            batch_id,
            "info",
            &format!(
                "Matching {} listings with {} workers",
                batch.progress.total, self.config.worker_count
            ),
        )
        .await;

        let tally = match self.match_listings(&mut batch, &cancel_token).await {
            Ok(tally) => tally,
            Err(e) => return self.fail_batch(batch, e).await,
        };
        self.log(batch_id, "info", &tally.describe()).await;

        if tally.processed < batch.progress.total {
            batch.status = BatchStatus::Cancelled;
            batch.incomplete = true;
            batch.error_message = Some(CANCELLED_MESSAGE.to_string());
            tracing::info!(
                batch_id = %batch_id,
                processed = tally.processed,
                total = batch.progress.total,
                "Batch cancelled, keeping partial results"
            );
            self.log(
                batch_id,
                "warn",
                &format!(
                    "Cancelled after {} of {} listings",
                    tally.processed, batch.progress.total
                ),
            )
            .await;
        }

        match self.finalize_changes(&batch).await {
            Ok(set) => self.log_change_set(batch_id, &set).await,
            Err(e) => return self.fail_batch(batch, e).await,
        }

        if batch.status == BatchStatus::Running {
            batch.status = BatchStatus::Succeeded;
        }
        self.finish_batch(batch).await
    }

    async fn match_listings(
        &self,
        batch: &mut StagingBatch,
        cancel_token: &CancellationToken,
    ) -> Result<MatchTally> {
        let batch_id = batch.batch_id;
        let listings = db::batches::load_listings(&self.db, batch_id).await?;
        let total = listings.len();

        let catalog = CatalogSnapshot::load(&self.db).await?;
        let signatures: Vec<String> = listings.iter().map(signature).collect();
        let knowledge =
            KnowledgeCache::load(&self.db, &signatures, self.config.knowledge_cache_capacity)
                .await?;

        let engine = MatchingEngine::new(self.config.review_threshold);
        let ctx = MatchContext {
            catalog: &catalog,
            knowledge: &knowledge,
            now: Utc::now(),
            staleness_window: self.config.staleness_window(),
        };

        let progress_step = (total / PROGRESS_UPDATES_PER_RUN).max(1);
        let mut tally = MatchTally::default();

        let engine = &engine;
        let ctx = &ctx;
        let listings = &listings;
        // take_while is polled only when a worker slot frees up, so a
        // cancellation stops new matches while in-flight ones finish.
        // Indices rather than borrowed items keep the future Send.
        let mut completed = stream::iter(0..total)
            .take_while(|_: &usize| future::ready(!cancel_token.is_cancelled()))
            .map(move |index: usize| {
                let result = engine.match_listing(&listings[index], ctx);
                async move { self.persist_result(batch_id, result).await }
            })
            .buffer_unordered(self.config.worker_count.max(1));

        while let Some(outcome) = completed.next().await {
            let result = outcome?;
            tracing::debug!(
                batch_id = %batch_id,
                staging_item_id = result.staging_item_id,
                algorithm = %result.algorithm,
                confidence = result.confidence,
                "Listing matched"
            );
            tally.record(&result);

            if tally.processed % progress_step == 0 || tally.processed == total {
                batch.progress = BatchProgress::new(tally.processed, total);
                db::batches::save_progress(
                    &self.db,
                    batch_id,
                    &batch.progress,
                    self.config.db_max_lock_wait_ms,
                )
                .await?;
                self.event_bus.emit_lossy(ReconEvent::BatchProgress {
                    batch_id,
                    processed: tally.processed,
                    total,
                    timestamp: Utc::now(),
                });
            }
        }

        batch.progress = BatchProgress::new(tally.processed, total);
        Ok(tally)
    }

    async fn persist_result(&self, batch_id: Uuid, result: MatchResult) -> Result<MatchResult> {
        retry_on_lock(
            "insert_match_result",
            self.config.db_max_lock_wait_ms,
            || async {
                let mut conn = self.db.acquire().await?;
                db::batches::insert_match_result(&mut conn, batch_id, &result).await
            },
        )
        .await?;
        Ok(result)
    }

    /// Derive and persist the change set of a batch whose matching has ended
    async fn finalize_changes(&self, batch: &StagingBatch) -> Result<ChangeSet> {
        let catalog = CatalogSnapshot::load(&self.db).await?;
        retry_on_lock(
            "finalize_changes",
            self.config.db_max_lock_wait_ms,
            || async {
                let mut tx = self.db.begin().await?;
                let set = recompute_changes(&mut tx, batch, &catalog).await?;
                tx.commit().await?;
                Ok(set)
            },
        )
        .await
    }

    /// Persist the change set of whatever a batch matched before it was
    /// interrupted
    pub async fn derive_partial_changes(&self, batch_id: Uuid) -> Result<ChangeSet> {
        let batch = self.require_batch(batch_id).await?;
        let set = self.finalize_changes(&batch).await?;
        self.log_change_set(batch_id, &set).await;
        Ok(set)
    }

    /// Record a failure on the batch, keeping whatever was matched
    async fn fail_batch(&self, mut batch: StagingBatch, error: Error) -> Result<StagingBatch> {
        tracing::error!(batch_id = %batch.batch_id, error = %error, "Batch failed");
        self.log(batch.batch_id, "error", &format!("Batch failed: {}", error))
            .await;

        batch.status = BatchStatus::Failed;
        batch.error_message = Some(error.to_string());
        batch.incomplete = true;

        if let Err(e) = self.finalize_changes(&batch).await {
            tracing::warn!(
                batch_id = %batch.batch_id,
                error = %e,
                "Could not derive partial change set"
            );
        }

        self.finish_batch(batch).await
    }

    async fn finish_batch(&self, mut batch: StagingBatch) -> Result<StagingBatch> {
        batch.ended_at = Some(Utc::now());
        db::batches::save_batch(&self.db, &batch, self.config.db_max_lock_wait_ms).await?;

        tracing::info!(
            batch_id = %batch.batch_id,
            status = %batch.status,
            incomplete = batch.incomplete,
            "Batch finished"
        );
        self.log(
            batch.batch_id,
            "info",
            &format!("Batch {}", batch.status),
        )
        .await;
        self.event_bus.emit_lossy(ReconEvent::BatchFinished {
            batch_id: batch.batch_id,
            status: batch.status.to_string(),
            incomplete: batch.incomplete,
            timestamp: Utc::now(),
        });

        Ok(batch)
    }

    async fn log_change_set(&self, batch_id: Uuid, set: &ChangeSet) {
        let summary = DiffSummary::from_changes(&set.changes, set.unmapped);
        let mut message = format!(
            "Change set: {} inserts, {} updates, {} deletes, {} unchanged, {} unmapped",
            summary.inserts, summary.updates, summary.deletes, summary.noops, summary.unmapped
        );
        if !set.duplicates.is_empty() {
            message.push_str(&format!(
                ", {} listings share a capacity with a better match",
                set.duplicates.len()
            ));
        }
        self.log(batch_id, "info", &message).await;
    }

    // ========================================================================
    // Diff
    // ========================================================================

    /// Live change set of a finished batch
    pub async fn diff_report(&self, batch_id: Uuid) -> Result<DiffReport> {
        let batch = self.require_batch(batch_id).await?;
        if !batch.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "batch {} is {}; its diff is available once it has finished",
                batch_id, batch.status
            )));
        }

        let mut conn = self.db.acquire().await?;
        let changes: Vec<ChangeRecord> = db::batches::load_changes(&mut conn, batch_id)
            .await?
            .into_iter()
            .map(|stored| stored.record)
            .collect();
        let results = db::batches::load_current_results(&mut conn, batch_id).await?;
        let rejected = db::batches::rejected_items(&mut conn, batch_id).await?;

        let owners: HashSet<i64> = changes.iter().filter_map(|c| c.staging_item_id).collect();
        let mapped = results.iter().filter(|r| r.is_mapped()).count();
        let duplicates: Vec<i64> = results
            .iter()
            .filter(|r| r.is_mapped())
            .map(|r| r.staging_item_id)
            .filter(|id| !rejected.contains(id) && !owners.contains(id))
            .collect();
        let unmapped = batch.progress.total.saturating_sub(mapped);

        Ok(DiffReport {
            summary: DiffSummary::from_changes(&changes, unmapped),
            changes,
            duplicates,
        })
    }

    // ========================================================================
    // Apply
    // ========================================================================

    /// Write the selected live changes of a succeeded batch to the catalog
    ///
    /// Each record is applied in its own transaction while holding the lock
    /// of its capacity. A record whose `before` no longer matches the catalog
    /// is reported as a conflict; the remaining records still apply.
    pub async fn apply_changes(&self, batch_id: Uuid, filter: &ApplyFilter) -> Result<ApplyReport> {
        let batch = self.require_batch(batch_id).await?;
        if batch.status != BatchStatus::Succeeded {
            return Err(Error::InvalidInput(format!(
                "batch {} is {}; only succeeded batches can be applied",
                batch_id, batch.status
            )));
        }

        let (changes, rejected) = {
            let mut conn = self.db.acquire().await?;
            let changes = db::batches::load_changes(&mut conn, batch_id).await?;
            let rejected = db::batches::rejected_items(&mut conn, batch_id).await?;
            (changes, rejected)
        };
        let listings: HashMap<i64, ExternalListing> = db::batches::load_listings(&self.db, batch_id)
            .await?
            .into_iter()
            .map(|l| (l.staging_item_id, l))
            .collect();

        let mut report = ApplyReport::default();
        for change in &changes {
            let record = &change.record;
            if !filter.selects_kind(record.kind) || !filter.selects_item(record.staging_item_id) {
                continue;
            }
            let is_rejected = record
                .staging_item_id
                .is_some_and(|id| rejected.contains(&id));
            if change.applied || is_rejected || record.confidence < filter.confidence_threshold {
                report.skipped += 1;
                continue;
            }

            let listing = record.staging_item_id.and_then(|id| listings.get(&id));
            match self.apply_one(&batch, change, listing).await? {
                ApplyOutcome::Applied => report.applied += 1,
                ApplyOutcome::AlreadyApplied => report.skipped += 1,
                ApplyOutcome::Conflict(conflict) => {
                    tracing::warn!(
                        batch_id = %batch_id,
                        capacity_id = conflict.capacity_id,
                        expected = ?conflict.expected,
                        actual = ?conflict.actual,
                        "Apply conflict"
                    );
                    report.conflicts.push(conflict);
                }
            }
        }

        tracing::info!(
            batch_id = %batch_id,
            applied = report.applied,
            skipped = report.skipped,
            conflicts = report.conflicts.len(),
            "Changes applied"
        );
        self.log(
            batch_id,
            "info",
            &format!(
                "Applied {} changes ({} skipped, {} conflicts)",
                report.applied,
                report.skipped,
                report.conflicts.len()
            ),
        )
        .await;
        if report.applied > 0 || !report.conflicts.is_empty() {
            self.event_bus.emit_lossy(ReconEvent::ChangesApplied {
                batch_id,
                applied: report.applied,
                conflicts: report.conflicts.len(),
                timestamp: Utc::now(),
            });
        }

        Ok(report)
    }

    async fn apply_one(
        &self,
        batch: &StagingBatch,
        change: &StoredChange,
        listing: Option<&ExternalListing>,
    ) -> Result<ApplyOutcome> {
        let _guard = self.capacity_locks.lock(change.record.capacity_id).await;
        retry_on_lock("apply_change", self.config.db_max_lock_wait_ms, || {
            self.apply_in_transaction(batch, change, listing)
        })
        .await
    }

    async fn apply_in_transaction(
        &self,
        batch: &StagingBatch,
        change: &StoredChange,
        listing: Option<&ExternalListing>,
    ) -> Result<ApplyOutcome> {
        let record = &change.record;
        let mut tx = self.db.begin().await?;

        // Claim the record first. One applied by a concurrent caller or
        // superseded by a review decision since it was loaded leaves the
        // catalog untouched; a conflict below rolls the claim back.
        if !db::batches::mark_change_applied(&mut tx, change.id).await? {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        if db::catalog::get_capacity(&mut tx, record.capacity_id).await?.is_none() {
            return Ok(ApplyOutcome::Conflict(conflict(
                record,
                None,
                "capacity no longer exists in the catalog",
            )));
        }

        let current = db::catalog::current_price(&mut tx, record.capacity_id, &batch.channel).await?;
        if current != record.before {
            return Ok(ApplyOutcome::Conflict(conflict(
                record,
                current,
                "catalog price changed since the diff was computed",
            )));
        }

        match (record.kind, record.after) {
            (ChangeKind::Insert | ChangeKind::Update, Some(after)) => {
                db::catalog::upsert_price(&mut tx, record.capacity_id, &batch.channel, after).await?;
            }
            (ChangeKind::Delete, _) => {
                db::catalog::delete_price(&mut tx, record.capacity_id, &batch.channel).await?;
            }
            _ => {}
        }

        // An applied mapping is remembered for the next run
        if let (Some(listing), Some(algorithm)) = (listing, record.algorithm) {
            knowledge_base::learn_if_absent(
                &mut tx,
                &signature(listing),
                record.capacity_id,
                record.confidence,
                algorithm,
                KnowledgeEvent::Learned,
                WriteOrigin {
                    batch_id: batch.batch_id,
                    staging_item_id: listing.staging_item_id,
                },
            )
            .await?;
        }

        db::batches::increment_applied_count(&mut tx, batch.batch_id, 1).await?;
        tx.commit().await?;
        Ok(ApplyOutcome::Applied)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require_batch(&self, batch_id: Uuid) -> Result<StagingBatch> {
        db::batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))
    }

    /// Append a line to the batch log; failures only reach tracing
    pub async fn log(&self, batch_id: Uuid, level: &str, message: &str) {
        if let Err(e) = db::batches::append_log(
            &self.db,
            batch_id,
            level,
            message,
            self.config.db_max_lock_wait_ms,
        )
        .await
        {
            tracing::warn!(batch_id = %batch_id, error = %e, "Failed to persist batch log line");
        }
    }
}

fn conflict(record: &ChangeRecord, actual: Option<Price>, reason: &str) -> ApplyConflict {
    ApplyConflict {
        staging_item_id: record.staging_item_id,
        capacity_id: record.capacity_id,
        kind: record.kind,
        expected: record.before,
        actual,
        reason: reason.to_string(),
    }
}

/// Replace the unapplied change records of a batch with a freshly derived set
///
/// Records already applied stay live; their listings and capacities get no
/// new record. DELETE records are only derived for complete runs.
pub(crate) async fn recompute_changes(
    conn: &mut SqliteConnection,
    batch: &StagingBatch,
    catalog: &CatalogSnapshot,
) -> Result<ChangeSet> {
    let batch_id = batch.batch_id;
    let listings = db::batches::load_listings(&mut *conn, batch_id).await?;
    let results = db::batches::load_current_results(conn, batch_id).await?;
    let excluded_items = db::batches::rejected_items(conn, batch_id).await?;

    let existing = db::batches::load_changes(conn, batch_id).await?;
    let applied: Vec<&ChangeRecord> = existing
        .iter()
        .filter(|c| c.applied)
        .map(|c| &c.record)
        .collect();
    let applied_items: HashSet<i64> = applied.iter().filter_map(|c| c.staging_item_id).collect();
    let applied_capacities: HashSet<i64> = applied.iter().map(|c| c.capacity_id).collect();

    let options = DiffOptions {
        channel: batch.channel.clone(),
        include_deletes: !batch.incomplete,
        excluded_items,
    };
    let mut set = diff::compute_changes(&listings, &results, catalog, &options);
    set.changes.retain(|c| {
        !applied_capacities.contains(&c.capacity_id)
            && !c.staging_item_id.is_some_and(|id| applied_items.contains(&id))
    });

    let superseded = db::batches::supersede_pending_changes(conn, batch_id).await?;
    db::batches::insert_changes(conn, batch_id, &set.changes).await?;

    tracing::debug!(
        batch_id = %batch_id,
        superseded,
        records = set.changes.len(),
        "Change set recomputed"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_filter_wire_names() {
        let filter: ApplyFilter = serde_json::from_value(serde_json::json!({
            "aplicar_inserciones": true,
            "aplicar_actualizaciones": false,
            "aplicar_eliminaciones": false,
            "confidence_threshold": 80,
        }))
        .unwrap();

        assert!(filter.selects_kind(ChangeKind::Insert));
        assert!(!filter.selects_kind(ChangeKind::Update));
        assert!(!filter.selects_kind(ChangeKind::Noop));
        assert_eq!(filter.confidence_threshold, 80);
        assert!(filter.selects_item(None));
    }

    #[test]
    fn item_subset_excludes_deletes() {
        let filter = ApplyFilter::single(3);
        assert!(filter.selects_item(Some(3)));
        assert!(!filter.selects_item(Some(4)));
        assert!(!filter.selects_item(None));
    }

    #[test]
    fn tally_description_lists_phases() {
        let mut tally = MatchTally::default();
        tally.record(&MatchResult::failed(1, serde_json::json!({})));
        assert_eq!(tally.processed, 1);
        assert_eq!(tally.needs_review, 1);
        assert!(tally.describe().contains("failed=1"));
    }
}
