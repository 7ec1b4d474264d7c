//! Matching Engine
//!
//! Resolves an external listing to a catalog capacity by running an ordered
//! list of strategies (cached → exact → fuzzy → heuristic). The first strategy
//! that clears its confidence floor wins. A strategy that identifies the model
//! but finds no capacity with the declared storage ends the search with a
//! failed result.

pub mod cached;
pub mod exact;
pub mod fuzzy;
pub mod heuristic;
pub mod normalize;
pub mod snapshot;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::cmp::Ordering;

use crate::models::{ExternalListing, MatchAlgorithm, MatchResult};
use crate::services::knowledge_base::KnowledgeCache;

pub use cached::CachedStrategy;
pub use exact::ExactStrategy;
pub use fuzzy::FuzzyStrategy;
pub use heuristic::HeuristicStrategy;
pub use snapshot::CatalogSnapshot;

/// Everything a strategy may consult. Read-only for the whole run.
pub struct MatchContext<'a> {
    pub catalog: &'a CatalogSnapshot,
    pub knowledge: &'a KnowledgeCache,
    pub now: DateTime<Utc>,
    pub staleness_window: Duration,
}

/// A capacity proposed by a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub capacity_id: i64,
    pub model_id: i64,
    pub confidence: u8,
    /// Strategy-specific evidence, copied into the result metadata
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Matched(Candidate),
    /// The model was identified but has no capacity with the listing's storage
    ModelWithoutCapacity {
        model_id: i64,
        storage_gb: Option<u32>,
    },
    NoMatch(String),
}

impl StrategyOutcome {
    pub fn no_match(reason: impl Into<String>) -> Self {
        StrategyOutcome::NoMatch(reason.into())
    }
}

/// One matching phase
pub trait MatchStrategy: Send + Sync {
    fn algorithm(&self) -> MatchAlgorithm;

    /// Results below this confidence fall through to the next phase
    fn min_confidence(&self) -> u8;

    fn attempt_match(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> StrategyOutcome;
}

/// The four phases in evaluation order
pub fn default_strategies() -> Vec<Box<dyn MatchStrategy>> {
    vec![
        Box::new(CachedStrategy),
        Box::new(ExactStrategy),
        Box::new(FuzzyStrategy),
        Box::new(HeuristicStrategy),
    ]
}

pub struct MatchingEngine {
    strategies: Vec<Box<dyn MatchStrategy>>,
    review_threshold: u8,
}

impl MatchingEngine {
    pub fn new(review_threshold: u8) -> Self {
        Self::with_strategies(default_strategies(), review_threshold)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn MatchStrategy>>, review_threshold: u8) -> Self {
        Self {
            strategies,
            review_threshold,
        }
    }

    pub fn review_threshold(&self) -> u8 {
        self.review_threshold
    }

    /// Match one listing. Never fails: an unmatched listing yields an
    /// `algorithm = failed` result carrying the reason in its metadata.
    pub fn match_listing(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> MatchResult {
        let mut trace: Vec<Value> = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let phase = strategy.algorithm();
            match strategy.attempt_match(listing, ctx) {
                StrategyOutcome::Matched(candidate) if candidate.confidence >= strategy.min_confidence() => {
                    trace.push(json!({ "phase": phase, "outcome": "matched" }));
                    return MatchResult {
                        staging_item_id: listing.staging_item_id,
                        capacity_id: Some(candidate.capacity_id),
                        model_id: Some(candidate.model_id),
                        confidence: candidate.confidence,
                        algorithm: phase,
                        needs_review: candidate.confidence < self.review_threshold,
                        metadata: json!({
                            "phases": trace,
                            "details": candidate.details,
                        }),
                    };
                }
                StrategyOutcome::Matched(candidate) => {
                    trace.push(json!({
                        "phase": phase,
                        "outcome": "below_floor",
                        "confidence": candidate.confidence,
                    }));
                }
                StrategyOutcome::ModelWithoutCapacity { model_id, storage_gb } => {
                    trace.push(json!({ "phase": phase, "outcome": "capacity_missing" }));
                    return MatchResult::failed(
                        listing.staging_item_id,
                        json!({
                            "phases": trace,
                            "reason": "capacity_missing",
                            "attempted_algorithm": phase,
                            "model_id": model_id,
                            "storage_gb": storage_gb,
                        }),
                    );
                }
                StrategyOutcome::NoMatch(reason) => {
                    trace.push(json!({ "phase": phase, "outcome": "no_match", "reason": reason }));
                }
            }
        }

        MatchResult::failed(
            listing.staging_item_id,
            json!({ "phases": trace, "reason": "no_match" }),
        )
    }
}

/// Preference between two models that scored the same: more Knowledge Base
/// confirmations, then the most recently created, then the highest id.
/// `Ordering::Greater` means `a` is preferred.
pub fn compare_models(catalog: &CatalogSnapshot, a: i64, b: i64) -> Ordering {
    let created = |id: i64| catalog.model(id).map(|m| m.created_at);
    catalog
        .confirmations(a)
        .cmp(&catalog.confirmations(b))
        .then_with(|| created(a).cmp(&created(b)))
        .then_with(|| a.cmp(&b))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::models::{CatalogCapacity, CatalogModel, FeedListing, Price};
    use chrono::TimeZone;
    use std::collections::{BTreeMap, HashMap};

    pub fn model(id: i64, brand: &str, description: &str, codes: &[&str]) -> CatalogModel {
        CatalogModel {
            id,
            description: description.to_string(),
            device_type: "Smartphone".to_string(),
            brand: brand.to_string(),
            vendor_codes: codes.iter().map(|c| c.to_uppercase()).collect(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(id),
        }
    }

    pub fn capacity(id: i64, model_id: i64, storage_gb: u32, b2b: Option<f64>) -> CatalogCapacity {
        let mut prices = BTreeMap::new();
        if let Some(price) = b2b {
            prices.insert("b2b".to_string(), Price::from_units(price));
        }
        CatalogCapacity {
            id,
            model_id,
            storage_gb,
            prices,
        }
    }

    /// iPhone 13 (128/256), iPhone 12 (64/128), Galaxy S21 (128), Pixel 6 (128)
    pub fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::from_parts(
            vec![
                model(1, "Apple", "iPhone 13", &["A2633", "A2482"]),
                model(2, "Apple", "iPhone 12", &["A2403"]),
                model(3, "Samsung", "Galaxy S21", &["SM-G991B"]),
                model(4, "Google", "Pixel 6", &[]),
            ],
            vec![
                capacity(7, 1, 128, Some(400.0)),
                capacity(9, 1, 256, Some(480.0)),
                capacity(20, 2, 64, Some(250.0)),
                capacity(21, 2, 128, None),
                capacity(30, 3, 128, Some(300.0)),
                capacity(40, 4, 128, Some(200.0)),
            ],
            HashMap::new(),
        )
    }

    pub fn listing(id: i64, brand: &str, model: &str, storage: Option<u32>) -> ExternalListing {
        ExternalListing::from_feed(
            id,
            FeedListing {
                modelo_raw: model.to_string(),
                modelo_norm: model.to_string(),
                tipo: "Smartphone".to_string(),
                marca: brand.to_string(),
                almacenamiento_gb: storage,
                precio_b2b: Price::from_units(450.0),
                vendor_code: None,
                year: None,
                cpu: None,
            },
        )
    }

    pub fn context<'a>(catalog: &'a CatalogSnapshot, knowledge: &'a KnowledgeCache) -> MatchContext<'a> {
        MatchContext {
            catalog,
            knowledge,
            now: Utc::now(),
            staleness_window: Duration::minutes(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::services::knowledge_base::learned_entry;

    #[test]
    fn cached_phase_wins_over_fuzzy() {
        let catalog = catalog();
        let mut knowledge = KnowledgeCache::new(10);
        knowledge.insert(learned_entry(
            "apple|iphone 13|128gb",
            7,
            92,
            MatchAlgorithm::Fuzzy,
            Utc::now(),
        ));
        let engine = MatchingEngine::new(70);

        let result = engine.match_listing(
            &listing(1, "Apple", "iPhone 13", Some(128)),
            &context(&catalog, &knowledge),
        );

        assert_eq!(result.capacity_id, Some(7));
        assert_eq!(result.algorithm, MatchAlgorithm::Cached);
        assert_eq!(result.confidence, 92);
        assert!(!result.needs_review);
    }

    #[test]
    fn missing_capacity_fails_immediately() {
        let catalog = catalog();
        let knowledge = KnowledgeCache::new(10);
        let engine = MatchingEngine::new(70);

        let result = engine.match_listing(
            &listing(2, "Apple", "iPhone 13", Some(512)),
            &context(&catalog, &knowledge),
        );

        assert_eq!(result.capacity_id, None);
        assert_eq!(result.algorithm, MatchAlgorithm::Failed);
        assert!(result.needs_review);
        assert_eq!(result.confidence, 0);
        assert_eq!(result.reason(), Some("capacity_missing"));
        assert_eq!(result.metadata["model_id"], 1);
    }

    #[test]
    fn unknown_device_fails_with_trace() {
        let catalog = catalog();
        let knowledge = KnowledgeCache::new(10);
        let engine = MatchingEngine::new(70);

        let result = engine.match_listing(
            &listing(3, "Nokia", "3310", Some(1)),
            &context(&catalog, &knowledge),
        );

        assert_eq!(result.algorithm, MatchAlgorithm::Failed);
        assert_eq!(result.reason(), Some("no_match"));
        assert_eq!(result.metadata["phases"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn review_threshold_is_configurable() {
        let catalog = catalog();
        let knowledge = KnowledgeCache::new(10);
        let listing = listing(4, "Apple", "iPhone 13", Some(128));

        let strict = MatchingEngine::new(95).match_listing(&listing, &context(&catalog, &knowledge));
        assert_eq!(strict.algorithm, MatchAlgorithm::Fuzzy);
        assert!(strict.needs_review);

        let lenient = MatchingEngine::new(50).match_listing(&listing, &context(&catalog, &knowledge));
        assert!(!lenient.needs_review);
    }

    #[test]
    fn tie_break_prefers_confirmed_then_newest() {
        let catalog = CatalogSnapshot::from_parts(
            vec![
                model(1, "Apple", "iPhone 13", &[]),
                model(2, "Apple", "iPhone 13", &[]),
                model(3, "Apple", "iPhone 13", &[]),
            ],
            vec![],
            std::collections::HashMap::from([(1, 5)]),
        );
        assert_eq!(compare_models(&catalog, 1, 3), Ordering::Greater);
        assert_eq!(compare_models(&catalog, 3, 2), Ordering::Greater);
    }
}
