//! Phase 1: reuse a mapping the Knowledge Base already learned

use serde_json::json;

use super::normalize::signature;
use super::{Candidate, MatchContext, MatchStrategy, StrategyOutcome};
use crate::models::{ExternalListing, MatchAlgorithm};
use crate::services::knowledge_base::{cached_confidence, is_eligible};

pub struct CachedStrategy;

impl MatchStrategy for CachedStrategy {
    fn algorithm(&self) -> MatchAlgorithm {
        MatchAlgorithm::Cached
    }

    fn min_confidence(&self) -> u8 {
        1
    }

    fn attempt_match(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> StrategyOutcome {
        let signature = signature(listing);

        let Some(entry) = ctx.knowledge.get(&signature) else {
            return StrategyOutcome::no_match("no knowledge entry");
        };

        if !is_eligible(entry, ctx.now, ctx.staleness_window) {
            return StrategyOutcome::no_match("entry corrected within staleness window");
        }

        let Some(capacity) = ctx.catalog.capacity(entry.capacity_id) else {
            return StrategyOutcome::no_match(format!(
                "learned capacity {} no longer in catalog",
                entry.capacity_id
            ));
        };

        StrategyOutcome::Matched(Candidate {
            capacity_id: capacity.id,
            model_id: capacity.model_id,
            confidence: cached_confidence(entry),
            details: json!({
                "signature": signature,
                "times_confirmed": entry.times_confirmed,
                "times_corrected": entry.times_corrected,
                "user_validated": entry.user_validated,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::knowledge_base::{corrected_entry, learned_entry, KnowledgeCache};
    use crate::services::matching::fixtures::*;
    use chrono::{Duration, Utc};

    #[test]
    fn hit_returns_stored_confidence() {
        let catalog = catalog();
        let mut knowledge = KnowledgeCache::new(10);
        knowledge.insert(learned_entry("apple|iphone 13|128gb", 7, 92, MatchAlgorithm::Exact, Utc::now()));

        let outcome = CachedStrategy.attempt_match(
            &listing(1, "Apple", "iPhone 13", Some(128)),
            &context(&catalog, &knowledge),
        );
        match outcome {
            StrategyOutcome::Matched(c) => {
                assert_eq!(c.capacity_id, 7);
                assert_eq!(c.model_id, 1);
                assert_eq!(c.confidence, 92);
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn recently_corrected_entry_is_skipped() {
        let catalog = catalog();
        let mut knowledge = KnowledgeCache::new(10);
        let now = Utc::now();
        let entry = corrected_entry(None, "apple|iphone 13|128gb", 9, MatchAlgorithm::Fuzzy, now);
        knowledge.insert(entry);

        let mut ctx = context(&catalog, &knowledge);
        ctx.now = now + Duration::minutes(5);
        let outcome = CachedStrategy.attempt_match(&listing(1, "Apple", "iPhone 13", Some(128)), &ctx);
        assert!(matches!(outcome, StrategyOutcome::NoMatch(_)));

        ctx.now = now + Duration::minutes(90);
        let outcome = CachedStrategy.attempt_match(&listing(1, "Apple", "iPhone 13", Some(128)), &ctx);
        assert!(matches!(outcome, StrategyOutcome::Matched(ref c) if c.capacity_id == 9));
    }

    #[test]
    fn deleted_capacity_falls_through() {
        let catalog = catalog();
        let mut knowledge = KnowledgeCache::new(10);
        knowledge.insert(learned_entry("apple|iphone 13|128gb", 999, 92, MatchAlgorithm::Exact, Utc::now()));

        let outcome = CachedStrategy.attempt_match(
            &listing(1, "Apple", "iPhone 13", Some(128)),
            &context(&catalog, &knowledge),
        );
        assert!(matches!(outcome, StrategyOutcome::NoMatch(_)));
    }
}
