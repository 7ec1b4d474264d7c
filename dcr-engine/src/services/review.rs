//! Review & correction workflow
//!
//! Per-listing state machine: pending → (auto_mapped) → resolved. Every
//! decision on a batch runs under that batch's lock and commits in one
//! transaction together with its Knowledge Base write, any propagation to
//! other listings and the recomputed change set.

use chrono::Utc;
use dcr_common::events::{EventBus, ReconEvent};
use dcr_common::{Error, Result};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::knowledge_base::{self, KnowledgeCache, WriteOrigin};
use super::matching::normalize::{effective_storage, model_key, normalize_text, signature};
use super::matching::{CatalogSnapshot, MatchContext, MatchingEngine};
use super::pipeline::{recompute_changes, ApplyFilter, ApplyReport, StagingPipeline};
use crate::config::EngineConfig;
use crate::db;
use crate::models::{
    BatchStatus, CatalogCapacity, DecisionKind, ExternalListing, KnowledgeEntry, KnowledgeEvent,
    MatchAlgorithm, MatchResult, NewCatalogCapacity, NewCatalogModel, ReviewDecision,
    ReviewState, StagingBatch,
};
use crate::utils::{retry_on_lock, KeyedLocks};

/// Model definition supplied when an operator creates a model from a listing
#[derive(Debug, Clone)]
pub struct NewModelRequest {
    pub device_type: String,
    pub brand: String,
    pub model: String,
    /// Storage of the triggering listing; falls back to the listing's own
    pub storage_gb: Option<u32>,
    /// Extra capacities to create alongside
    pub extra_capacities: Vec<u32>,
}

/// Result of one review decision
#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub batch_id: Uuid,
    pub staging_item_id: i64,
    pub decision: DecisionKind,
    /// Current match result of the listing after the decision
    pub result: Option<MatchResult>,
    pub knowledge: Option<KnowledgeEntry>,
    /// Other listings resolved by propagation
    pub propagated: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<ApplyReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateModelOutcome {
    pub model_id: i64,
    pub capacities: Vec<CatalogCapacity>,
    pub auto_mapped_count: usize,
    #[serde(flatten)]
    pub decision: DecisionOutcome,
}

/// A listing waiting for a human, with what the engine tried
#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub staging_item_id: i64,
    pub listing: ExternalListing,
    pub signature: String,
    pub review_state: ReviewState,
    pub result: MatchResult,
    /// Phase that produced the result, or the last one attempted for failures
    pub attempted_algorithm: Option<String>,
    pub reason: Option<String>,
    /// Capacities of the identified model, when the engine found one
    pub model_capacities: Vec<CatalogCapacity>,
}

/// Validated target of a decision
struct DecisionTarget {
    batch: StagingBatch,
    listing: ExternalListing,
    result: Option<MatchResult>,
}

pub struct ReviewService {
    db: SqlitePool,
    config: Arc<EngineConfig>,
    event_bus: EventBus,
    pipeline: Arc<StagingPipeline>,
    batch_locks: KeyedLocks<Uuid>,
}

impl ReviewService {
    pub fn new(
        db: SqlitePool,
        config: Arc<EngineConfig>,
        event_bus: EventBus,
        pipeline: Arc<StagingPipeline>,
    ) -> Self {
        Self {
            db,
            config,
            event_bus,
            pipeline,
            batch_locks: KeyedLocks::new(),
        }
    }

    /// Listings of a succeeded batch that still need a decision
    pub async fn pending_items(&self, batch_id: Uuid) -> Result<Vec<ReviewItem>> {
        let batch = db::batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;
        if !batch.status.is_terminal() {
            return Ok(Vec::new());
        }

        let listings = db::batches::load_listings(&self.db, batch_id).await?;
        let (results, states) = {
            let mut conn = self.db.acquire().await?;
            let results: HashMap<i64, MatchResult> =
                db::batches::load_current_results(&mut conn, batch_id)
                    .await?
                    .into_iter()
                    .map(|r| (r.staging_item_id, r))
                    .collect();
            let states = db::batches::load_review_states(&mut conn, batch_id).await?;
            (results, states)
        };

        let mut items = Vec::new();
        for listing in listings {
            let state = states
                .get(&listing.staging_item_id)
                .copied()
                .unwrap_or(ReviewState::Pending);
            let Some(result) = results.get(&listing.staging_item_id) else {
                continue;
            };
            if state != ReviewState::Pending || !result.needs_review {
                continue;
            }

            let model_capacities = match result.model_id.or_else(|| metadata_i64(&result.metadata, "model_id")) {
                Some(model_id) => db::catalog::list_capacities(&self.db, model_id).await?,
                None => Vec::new(),
            };
            let attempted_algorithm = if result.algorithm == MatchAlgorithm::Failed {
                result
                    .metadata
                    .get("attempted_algorithm")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            } else {
                Some(result.algorithm.to_string())
            };

            items.push(ReviewItem {
                staging_item_id: listing.staging_item_id,
                signature: signature(&listing),
                review_state: state,
                attempted_algorithm,
                reason: result.reason().map(str::to_string),
                result: result.clone(),
                model_capacities,
                listing,
            });
        }

        Ok(items)
    }

    // ========================================================================
    // Decisions
    // ========================================================================

    /// Confirm the listing's current mapping
    pub async fn approve(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        apply_price: bool,
        notes: Option<String>,
    ) -> Result<DecisionOutcome> {
        let _guard = self.batch_locks.lock(batch_id).await;
        let catalog = CatalogSnapshot::load(&self.db).await?;

        let mut outcome = retry_on_lock("review_approve", self.config.db_max_lock_wait_ms, || {
            self.approve_in_transaction(batch_id, staging_item_id, notes.clone(), &catalog)
        })
        .await?;

        if apply_price {
            let report = self
                .pipeline
                .apply_changes(batch_id, &ApplyFilter::single(staging_item_id))
                .await?;
            outcome.applied = Some(report);
        }

        self.recorded(&outcome).await;
        Ok(outcome)
    }

    async fn approve_in_transaction(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        notes: Option<String>,
        catalog: &CatalogSnapshot,
    ) -> Result<DecisionOutcome> {
        let mut tx = self.db.begin().await?;
        let target = self.decision_target(&mut tx, batch_id, staging_item_id).await?;

        let current = match &target.result {
            Some(result) => result,
            None => {
                return Err(Error::InvalidInput(format!(
                    "listing {} of batch {} has no match result to approve",
                    staging_item_id, batch_id
                )))
            }
        };
        let Some(capacity_id) = current.capacity_id else {
            return Err(Error::InvalidInput(format!(
                "listing {} has no matched capacity to approve (algorithm {}, reason: {}); use correct or create-model instead",
                staging_item_id,
                attempted_algorithm(current),
                current.reason().unwrap_or("unknown"),
            )));
        };

        let origin = WriteOrigin {
            batch_id,
            staging_item_id,
        };
        let entry = knowledge_base::record_confirmation(
            &mut tx,
            &signature(&target.listing),
            capacity_id,
            current.confidence,
            current.algorithm,
            origin,
        )
        .await?;

        let confidence = current.confidence.max(entry.confidence);
        let approved = MatchResult {
            confidence,
            needs_review: confidence < self.config.review_threshold,
            metadata: json!({
                "origin": "review",
                "decision": DecisionKind::Approve,
                "previous_confidence": current.confidence,
                "previous": current.metadata,
            }),
            ..current.clone()
        };
        db::batches::insert_match_result(&mut tx, batch_id, &approved).await?;

        self.resolve(&mut tx, &target, DecisionKind::Approve, Some(capacity_id), notes)
            .await?;
        recompute_changes(&mut tx, &target.batch, catalog).await?;
        tx.commit().await?;

        Ok(DecisionOutcome {
            batch_id,
            staging_item_id,
            decision: DecisionKind::Approve,
            result: Some(approved),
            knowledge: Some(entry),
            propagated: Vec::new(),
            applied: None,
        })
    }

    /// Mark the listing as deliberately unmapped for this batch
    pub async fn reject(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        reason: Option<String>,
    ) -> Result<DecisionOutcome> {
        let _guard = self.batch_locks.lock(batch_id).await;
        let catalog = CatalogSnapshot::load(&self.db).await?;

        let outcome = retry_on_lock("review_reject", self.config.db_max_lock_wait_ms, || {
            self.reject_in_transaction(batch_id, staging_item_id, reason.clone(), &catalog)
        })
        .await?;

        self.recorded(&outcome).await;
        Ok(outcome)
    }

    async fn reject_in_transaction(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        reason: Option<String>,
        catalog: &CatalogSnapshot,
    ) -> Result<DecisionOutcome> {
        let mut tx = self.db.begin().await?;
        let target = self.decision_target(&mut tx, batch_id, staging_item_id).await?;

        self.resolve(&mut tx, &target, DecisionKind::Reject, None, reason)
            .await?;
        recompute_changes(&mut tx, &target.batch, catalog).await?;
        tx.commit().await?;

        Ok(DecisionOutcome {
            batch_id,
            staging_item_id,
            decision: DecisionKind::Reject,
            result: target.result,
            knowledge: None,
            propagated: Vec::new(),
            applied: None,
        })
    }

    /// Point the listing (and unresolved listings sharing its signature) at
    /// another capacity
    pub async fn correct(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        new_capacity_id: i64,
        reason: Option<String>,
    ) -> Result<DecisionOutcome> {
        let _guard = self.batch_locks.lock(batch_id).await;
        let catalog = CatalogSnapshot::load(&self.db).await?;

        let outcome = retry_on_lock("review_correct", self.config.db_max_lock_wait_ms, || {
            self.correct_in_transaction(
                batch_id,
                staging_item_id,
                new_capacity_id,
                reason.clone(),
                &catalog,
            )
        })
        .await?;

        self.recorded(&outcome).await;
        Ok(outcome)
    }

    async fn correct_in_transaction(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        new_capacity_id: i64,
        reason: Option<String>,
        catalog: &CatalogSnapshot,
    ) -> Result<DecisionOutcome> {
        let mut tx = self.db.begin().await?;
        let target = self.decision_target(&mut tx, batch_id, staging_item_id).await?;

        let capacity = db::catalog::get_capacity(&mut tx, new_capacity_id)
            .await?
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "capacity {} does not exist in the catalog",
                    new_capacity_id
                ))
            })?;

        let listing_signature = signature(&target.listing);
        let entry = knowledge_base::record_correction(
            &mut tx,
            &listing_signature,
            capacity.id,
            MatchAlgorithm::Cached,
            KnowledgeEvent::Corrected,
            WriteOrigin {
                batch_id,
                staging_item_id,
            },
        )
        .await?;

        let previous_capacity = target.result.as_ref().and_then(|r| r.capacity_id);
        let corrected = reviewed_result(
            staging_item_id,
            &capacity,
            entry.confidence,
            json!({
                "origin": "review",
                "decision": DecisionKind::Correct,
                "previous_capacity_id": previous_capacity,
                "reason": reason,
            }),
        );
        db::batches::insert_match_result(&mut tx, batch_id, &corrected).await?;
        self.resolve(&mut tx, &target, DecisionKind::Correct, Some(capacity.id), reason)
            .await?;

        let propagated = self
            .propagate_signature(&mut tx, &target, &listing_signature, &capacity, &entry)
            .await?;

        recompute_changes(&mut tx, &target.batch, catalog).await?;
        tx.commit().await?;

        tracing::info!(
            batch_id = %batch_id,
            staging_item_id,
            from = ?previous_capacity,
            to = capacity.id,
            propagated = propagated.len(),
            "Listing corrected"
        );

        Ok(DecisionOutcome {
            batch_id,
            staging_item_id,
            decision: DecisionKind::Correct,
            result: Some(corrected),
            knowledge: Some(entry),
            propagated,
            applied: None,
        })
    }

    /// Create a catalog model from a listing, then re-match the batch's
    /// unresolved listings of that model
    pub async fn create_model(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        request: NewModelRequest,
    ) -> Result<CreateModelOutcome> {
        let _guard = self.batch_locks.lock(batch_id).await;
        let catalog = CatalogSnapshot::load(&self.db).await?;

        let outcome = retry_on_lock("review_create_model", self.config.db_max_lock_wait_ms, || {
            self.create_model_in_transaction(batch_id, staging_item_id, &request, catalog.clone())
        })
        .await?;

        self.recorded(&outcome.decision).await;
        Ok(outcome)
    }

    async fn create_model_in_transaction(
        &self,
        batch_id: Uuid,
        staging_item_id: i64,
        request: &NewModelRequest,
        mut catalog: CatalogSnapshot,
    ) -> Result<CreateModelOutcome> {
        let mut tx = self.db.begin().await?;
        let target = self.decision_target(&mut tx, batch_id, staging_item_id).await?;

        let storage_gb = request
            .storage_gb
            .or_else(|| effective_storage(&target.listing).0)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "listing {} declares no storage; almacenamiento_gb is required",
                    staging_item_id
                ))
            })?;

        if let Some(model_id) =
            db::catalog::find_model_id(&mut tx, &request.brand, &request.model).await?
        {
            return Err(Error::InvalidInput(format!(
                "{} {} already exists as model {}; use correct with one of its capacities",
                request.brand.trim(),
                request.model.trim(),
                model_id
            )));
        }

        // Collect: every listing of the batch naming the same model
        let listings = db::batches::load_listings(&mut *tx, batch_id).await?;
        let new_key = model_key(&request.model, &request.brand);
        let new_brand = normalize_text(&request.brand);
        let same_model: Vec<&ExternalListing> = listings
            .iter()
            .filter(|l| normalize_text(&l.brand) == new_brand)
            .filter(|l| model_key(l.match_text(), &l.brand) == new_key)
            .collect();

        let mut storages: BTreeSet<u32> = request.extra_capacities.iter().copied().collect();
        storages.insert(storage_gb);
        storages.extend(same_model.iter().filter_map(|l| effective_storage(l).0));

        let new_model = NewCatalogModel {
            description: request.model.trim().to_string(),
            device_type: request.device_type.trim().to_string(),
            brand: request.brand.trim().to_string(),
            vendor_codes: target.listing.vendor_code.iter().cloned().collect(),
            capacities: storages
                .iter()
                .map(|&gb| NewCatalogCapacity {
                    storage_gb: gb,
                    prices: Default::default(),
                })
                .collect(),
        };
        let (model, capacities) = db::catalog::create_model(&mut tx, &new_model).await?;
        let Some(capacity) = capacities.iter().find(|c| c.storage_gb == storage_gb).cloned() else {
            return Err(Error::Internal(format!(
                "created model {} lacks its {} GB capacity",
                model.id, storage_gb
            )));
        };
        catalog.add_model(model.clone(), capacities.clone());

        let listing_signature = signature(&target.listing);
        let entry = knowledge_base::record_correction(
            &mut tx,
            &listing_signature,
            capacity.id,
            MatchAlgorithm::Cached,
            KnowledgeEvent::Created,
            WriteOrigin {
                batch_id,
                staging_item_id,
            },
        )
        .await?;

        let created = reviewed_result(
            staging_item_id,
            &capacity,
            entry.confidence,
            json!({
                "origin": "review",
                "decision": DecisionKind::CreateNew,
                "model_id": model.id,
            }),
        );
        db::batches::insert_match_result(&mut tx, batch_id, &created).await?;
        self.resolve(&mut tx, &target, DecisionKind::CreateNew, Some(capacity.id), None)
            .await?;

        let mut propagated = self
            .propagate_signature(&mut tx, &target, &listing_signature, &capacity, &entry)
            .await?;
        let rematched = self
            .rematch_model(&mut tx, &target, &same_model, model.id, &catalog, &propagated)
            .await?;
        propagated.extend(rematched);
        propagated.sort_unstable();

        recompute_changes(&mut tx, &target.batch, &catalog).await?;
        tx.commit().await?;

        tracing::info!(
            batch_id = %batch_id,
            staging_item_id,
            model_id = model.id,
            capacities = capacities.len(),
            auto_mapped = propagated.len(),
            "Model created from listing"
        );

        Ok(CreateModelOutcome {
            model_id: model.id,
            capacities,
            auto_mapped_count: propagated.len(),
            decision: DecisionOutcome {
                batch_id,
                staging_item_id,
                decision: DecisionKind::CreateNew,
                result: Some(created),
                knowledge: Some(entry),
                propagated,
                applied: None,
            },
        })
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    /// Map every other unresolved listing with the same signature to `capacity`
    async fn propagate_signature(
        &self,
        conn: &mut SqliteConnection,
        target: &DecisionTarget,
        listing_signature: &str,
        capacity: &CatalogCapacity,
        entry: &KnowledgeEntry,
    ) -> Result<Vec<i64>> {
        let batch_id = target.batch.batch_id;
        let trigger = target.listing.staging_item_id;
        let listings = db::batches::load_listings(&mut *conn, batch_id).await?;
        let states = db::batches::load_review_states(conn, batch_id).await?;

        // Collect, then commit: nothing is written until every listing is known
        let affected: Vec<i64> = listings
            .iter()
            .filter(|l| l.staging_item_id != trigger)
            .filter(|l| {
                states
                    .get(&l.staging_item_id)
                    .is_some_and(|s| s.accepts_decision())
            })
            .filter(|l| signature(l) == listing_signature)
            .map(|l| l.staging_item_id)
            .collect();

        let confidence = knowledge_base::cached_confidence(entry);
        for &item in &affected {
            let mut result = reviewed_result(
                item,
                capacity,
                confidence,
                json!({
                    "origin": "propagation",
                    "trigger_item_id": trigger,
                    "signature": listing_signature,
                }),
            );
            result.needs_review = confidence < self.config.review_threshold;
            db::batches::insert_match_result(conn, batch_id, &result).await?;
            db::batches::set_review_state(conn, batch_id, item, ReviewState::AutoMapped).await?;
        }

        Ok(affected)
    }

    /// Re-run the matching engine over pending, unmapped or doubtful listings
    /// of a freshly created model; those landing on it become auto_mapped
    async fn rematch_model(
        &self,
        conn: &mut SqliteConnection,
        target: &DecisionTarget,
        same_model: &[&ExternalListing],
        model_id: i64,
        catalog: &CatalogSnapshot,
        already: &[i64],
    ) -> Result<Vec<i64>> {
        let batch_id = target.batch.batch_id;
        let trigger = target.listing.staging_item_id;
        let states = db::batches::load_review_states(conn, batch_id).await?;
        let current: HashMap<i64, MatchResult> = db::batches::load_current_results(conn, batch_id)
            .await?
            .into_iter()
            .map(|r| (r.staging_item_id, r))
            .collect();

        let knowledge = KnowledgeCache::new(1);
        let engine = MatchingEngine::new(self.config.review_threshold);
        let ctx = MatchContext {
            catalog,
            knowledge: &knowledge,
            now: Utc::now(),
            staleness_window: self.config.staleness_window(),
        };

        // Collect and validate every new result before writing any of them
        let mut rematched = Vec::new();
        for listing in same_model {
            let item = listing.staging_item_id;
            if item == trigger || already.contains(&item) {
                continue;
            }
            if states.get(&item) != Some(&ReviewState::Pending) {
                continue;
            }
            let unsettled = current
                .get(&item)
                .map_or(true, |r| !r.is_mapped() || r.needs_review);
            if !unsettled {
                continue;
            }

            let mut result = engine.match_listing(listing, &ctx);
            if result.model_id != Some(model_id) {
                continue;
            }
            if let Value::Object(metadata) = &mut result.metadata {
                metadata.insert("origin".to_string(), json!("propagation"));
                metadata.insert("trigger_item_id".to_string(), json!(trigger));
            }
            rematched.push((listing, result));
        }

        let mut resolved = Vec::with_capacity(rematched.len());
        for (listing, result) in rematched {
            let item = listing.staging_item_id;
            if let Some(capacity_id) = result.capacity_id {
                knowledge_base::learn_if_absent(
                    conn,
                    &signature(listing),
                    capacity_id,
                    result.confidence,
                    result.algorithm,
                    KnowledgeEvent::Propagated,
                    WriteOrigin {
                        batch_id,
                        staging_item_id: item,
                    },
                )
                .await?;
            }
            db::batches::insert_match_result(conn, batch_id, &result).await?;
            db::batches::set_review_state(conn, batch_id, item, ReviewState::AutoMapped).await?;
            resolved.push(item);
        }

        Ok(resolved)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Validate that a decision may be taken on a listing
    async fn decision_target(
        &self,
        conn: &mut SqliteConnection,
        batch_id: Uuid,
        staging_item_id: i64,
    ) -> Result<DecisionTarget> {
        let batch = db::batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;
        if batch.status != BatchStatus::Succeeded {
            return Err(Error::InvalidInput(format!(
                "batch {} is {}; review decisions need a succeeded batch",
                batch_id, batch.status
            )));
        }

        let Some((listing, state)) = db::batches::load_listing(conn, batch_id, staging_item_id).await?
        else {
            return Err(Error::InvalidInput(format!(
                "listing {} does not belong to batch {}",
                staging_item_id, batch_id
            )));
        };
        if !state.accepts_decision() {
            return Err(Error::InvalidInput(format!(
                "listing {} of batch {} is already resolved",
                staging_item_id, batch_id
            )));
        }

        let result = db::batches::load_current_result(conn, batch_id, staging_item_id).await?;
        Ok(DecisionTarget {
            batch,
            listing,
            result,
        })
    }

    async fn resolve(
        &self,
        conn: &mut SqliteConnection,
        target: &DecisionTarget,
        decision: DecisionKind,
        target_capacity_id: Option<i64>,
        notes: Option<String>,
    ) -> Result<()> {
        let staging_item_id = target.listing.staging_item_id;
        db::batches::insert_decision(
            conn,
            target.batch.batch_id,
            &ReviewDecision {
                staging_item_id,
                decision,
                target_capacity_id,
                notes,
                decided_at: Utc::now(),
            },
        )
        .await?;
        db::batches::set_review_state(
            conn,
            target.batch.batch_id,
            staging_item_id,
            ReviewState::Resolved,
        )
        .await
    }

    /// Events and batch log after a decision committed
    async fn recorded(&self, outcome: &DecisionOutcome) {
        self.event_bus.emit_lossy(ReconEvent::ReviewDecisionRecorded {
            batch_id: outcome.batch_id,
            staging_item_id: outcome.staging_item_id,
            decision: outcome.decision.to_string(),
            timestamp: Utc::now(),
        });
        if !outcome.propagated.is_empty() {
            self.event_bus.emit_lossy(ReconEvent::PropagationCompleted {
                batch_id: outcome.batch_id,
                trigger_item_id: outcome.staging_item_id,
                resolved_count: outcome.propagated.len(),
                timestamp: Utc::now(),
            });
        }

        let mut message = format!(
            "Listing {}: {}",
            outcome.staging_item_id, outcome.decision
        );
        if !outcome.propagated.is_empty() {
            message.push_str(&format!(
                ", {} other listings auto-mapped",
                outcome.propagated.len()
            ));
        }
        self.pipeline.log(outcome.batch_id, "info", &message).await;
    }
}

/// Result written for a listing whose mapping now comes from a human
///
/// Such mappings are served from the Knowledge Base, hence `cached`.
fn reviewed_result(
    staging_item_id: i64,
    capacity: &CatalogCapacity,
    confidence: u8,
    metadata: Value,
) -> MatchResult {
    MatchResult {
        staging_item_id,
        capacity_id: Some(capacity.id),
        model_id: Some(capacity.model_id),
        confidence,
        algorithm: MatchAlgorithm::Cached,
        needs_review: false,
        metadata,
    }
}

fn attempted_algorithm(result: &MatchResult) -> String {
    result
        .metadata
        .get("attempted_algorithm")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| result.algorithm.to_string())
}

fn metadata_i64(metadata: &Value, key: &str) -> Option<i64> {
    metadata.get(key).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matching::fixtures::capacity;

    #[test]
    fn reviewed_results_are_cached_and_settled() {
        let cap = capacity(9, 1, 256, Some(480.0));
        let result = reviewed_result(4, &cap, 92, json!({"origin": "review"}));
        assert_eq!(result.capacity_id, Some(9));
        assert_eq!(result.model_id, Some(1));
        assert_eq!(result.algorithm, MatchAlgorithm::Cached);
        assert!(!result.needs_review);
    }

    #[test]
    fn failure_context_names_attempted_phase() {
        let failed = MatchResult::failed(
            3,
            json!({"reason": "capacity_missing", "attempted_algorithm": "fuzzy", "model_id": 1}),
        );
        assert_eq!(attempted_algorithm(&failed), "fuzzy");
        assert_eq!(metadata_i64(&failed.metadata, "model_id"), Some(1));

        let unknown = MatchResult::failed(3, json!({"reason": "no_match"}));
        assert_eq!(attempted_algorithm(&unknown), "failed");
    }
}
