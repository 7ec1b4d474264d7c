//! Phase 2: vendor hardware code that points at exactly one model

use serde_json::json;

use super::normalize::{model_key, normalize_text};
use super::{Candidate, MatchContext, MatchStrategy, StrategyOutcome};
use crate::models::{ExternalListing, MatchAlgorithm};

/// Code and normalized model name agree
const NAME_AGREES: u8 = 98;
/// Code and brand agree
const BRAND_AGREES: u8 = 96;
/// Code alone
const CODE_ONLY: u8 = 95;

pub struct ExactStrategy;

impl MatchStrategy for ExactStrategy {
    fn algorithm(&self) -> MatchAlgorithm {
        MatchAlgorithm::Exact
    }

    fn min_confidence(&self) -> u8 {
        CODE_ONLY
    }

    fn attempt_match(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> StrategyOutcome {
        let Some(code) = listing.vendor_code.as_deref() else {
            return StrategyOutcome::no_match("no vendor code");
        };

        let model_id = match ctx.catalog.models_with_code(code) {
            [] => return StrategyOutcome::no_match(format!("vendor code {} unknown", code)),
            [model_id] => *model_id,
            many => {
                return StrategyOutcome::no_match(format!(
                    "vendor code {} maps to {} models",
                    code,
                    many.len()
                ))
            }
        };

        let Some(model) = ctx.catalog.model(model_id) else {
            return StrategyOutcome::no_match(format!("model {} missing from snapshot", model_id));
        };

        let Some(storage_gb) = listing.storage_gb else {
            return StrategyOutcome::no_match("storage not declared");
        };

        let Some(capacity) = ctx.catalog.capacity_for(model_id, storage_gb) else {
            return StrategyOutcome::ModelWithoutCapacity {
                model_id,
                storage_gb: Some(storage_gb),
            };
        };

        let name_agrees = model_key(listing.match_text(), &listing.brand)
            == model_key(&model.description, &model.brand);
        let brand_agrees = normalize_text(&listing.brand) == normalize_text(&model.brand);
        let confidence = if name_agrees {
            NAME_AGREES
        } else if brand_agrees {
            BRAND_AGREES
        } else {
            CODE_ONLY
        };

        StrategyOutcome::Matched(Candidate {
            capacity_id: capacity.id,
            model_id,
            confidence,
            details: json!({
                "vendor_code": code.trim().to_uppercase(),
                "name_agrees": name_agrees,
                "brand_agrees": brand_agrees,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::knowledge_base::KnowledgeCache;
    use crate::services::matching::fixtures::*;

    fn with_code(mut listing: ExternalListing, code: &str) -> ExternalListing {
        listing.vendor_code = Some(code.to_string());
        listing
    }

    #[test]
    fn confidence_reflects_agreement() {
        let catalog = catalog();
        let knowledge = KnowledgeCache::new(1);
        let ctx = context(&catalog, &knowledge);

        let same_name = with_code(listing(1, "Apple", "iPhone 13", Some(128)), "a2633");
        let other_name = with_code(listing(2, "Apple", "Phone thirteen", Some(256)), "A2633");
        let other_brand = with_code(listing(3, "Unknown", "Phone", Some(128)), "A2633");

        let confidence = |l: &ExternalListing| match ExactStrategy.attempt_match(l, &ctx) {
            StrategyOutcome::Matched(c) => c.confidence,
            other => panic!("expected match, got {:?}", other),
        };
        assert_eq!(confidence(&same_name), 98);
        assert_eq!(confidence(&other_name), 96);
        assert_eq!(confidence(&other_brand), 95);
    }

    #[test]
    fn code_without_matching_storage() {
        let catalog = catalog();
        let knowledge = KnowledgeCache::new(1);
        let outcome = ExactStrategy.attempt_match(
            &with_code(listing(1, "Apple", "iPhone 13", Some(512)), "A2633"),
            &context(&catalog, &knowledge),
        );
        assert_eq!(
            outcome,
            StrategyOutcome::ModelWithoutCapacity {
                model_id: 1,
                storage_gb: Some(512)
            }
        );
    }

    #[test]
    fn unknown_code_falls_through() {
        let catalog = catalog();
        let knowledge = KnowledgeCache::new(1);
        let outcome = ExactStrategy.attempt_match(
            &with_code(listing(1, "Apple", "iPhone 13", Some(128)), "A9999"),
            &context(&catalog, &knowledge),
        );
        assert!(matches!(outcome, StrategyOutcome::NoMatch(_)));
    }
}
