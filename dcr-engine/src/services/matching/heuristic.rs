//! Phase 4: brand-specific rules
//!
//! | rule                    | brand   | confidence |
//! |-------------------------|---------|------------|
//! | A-number → vendor code  | Apple   | 80         |
//! | SM- code prefix         | Samsung | 75         |
//! | family token set        | Apple   | 72         |
//! | token set within brand  | any     | 65 (60 when storage was inferred) |
//!
//! Storage missing from the listing is inferred from its raw text.

use serde_json::json;
use std::collections::BTreeSet;

use super::normalize::{
    apple_a_numbers, descriptive_tokens, effective_storage, normalize_text, samsung_code_prefix,
};
use super::{compare_models, Candidate, MatchContext, MatchStrategy, StrategyOutcome};
use crate::models::{ExternalListing, MatchAlgorithm};

const APPLE_A_NUMBER: u8 = 80;
const SAMSUNG_CODE: u8 = 75;
const APPLE_FAMILY: u8 = 72;
const BRAND_TOKENS: u8 = 65;
const BRAND_TOKENS_INFERRED: u8 = 60;

pub struct HeuristicStrategy;

/// Tokens with letter/digit runs split apart ("iphone13" → "iphone", "13")
fn token_set(text: &str, brand: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for token in descriptive_tokens(text, brand) {
        let mut current = String::new();
        let mut last_digit: Option<bool> = None;
        for c in token.chars() {
            let digit = c.is_ascii_digit();
            if last_digit.is_some_and(|d| d != digit) {
                set.insert(std::mem::take(&mut current));
            }
            current.push(c);
            last_digit = Some(digit);
        }
        if !current.is_empty() {
            set.insert(current);
        }
    }
    set
}

/// Searchable text of a listing: raw name, normalized name and vendor code
fn listing_text(listing: &ExternalListing) -> String {
    format!(
        "{} {} {}",
        listing.model_raw,
        listing.model_norm,
        listing.vendor_code.as_deref().unwrap_or_default()
    )
}

struct Rule {
    name: &'static str,
    model_id: i64,
    confidence: u8,
}

impl HeuristicStrategy {
    fn apple_a_number(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> Option<Rule> {
        apple_a_numbers(&listing_text(listing))
            .into_iter()
            .find_map(|code| match ctx.catalog.models_with_code(&code) {
                [model_id] => Some(*model_id),
                _ => None,
            })
            .map(|model_id| Rule {
                name: "apple_a_number",
                model_id,
                confidence: APPLE_A_NUMBER,
            })
    }

    fn samsung_code(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> Option<Rule> {
        let prefix = samsung_code_prefix(&listing_text(listing))?;
        match ctx.catalog.models_with_code_prefix(&prefix).as_slice() {
            [model_id] => Some(Rule {
                name: "samsung_code",
                model_id: *model_id,
                confidence: SAMSUNG_CODE,
            }),
            _ => None,
        }
    }

    /// Best model of `brand` whose token set equals the listing's
    fn token_set_match(&self, listing: &ExternalListing, brand: &str, ctx: &MatchContext<'_>) -> Option<i64> {
        let wanted = token_set(listing.match_text(), &listing.brand);
        if wanted.is_empty() {
            return None;
        }

        ctx.catalog
            .model_ids()
            .iter()
            .copied()
            .filter(|&id| ctx.catalog.keys(id).is_some_and(|k| k.brand == brand))
            .filter(|&id| {
                ctx.catalog
                    .model(id)
                    .is_some_and(|m| token_set(&m.description, &m.brand) == wanted)
            })
            .max_by(|&a, &b| compare_models(ctx.catalog, a, b))
    }
}

impl MatchStrategy for HeuristicStrategy {
    fn algorithm(&self) -> MatchAlgorithm {
        MatchAlgorithm::Heuristic
    }

    fn min_confidence(&self) -> u8 {
        BRAND_TOKENS_INFERRED
    }

    fn attempt_match(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> StrategyOutcome {
        let brand = normalize_text(&listing.brand);
        let (storage_gb, inferred) = effective_storage(listing);

        let rule = match brand.as_str() {
            "apple" => self.apple_a_number(listing, ctx).or_else(|| {
                self.token_set_match(listing, &brand, ctx).map(|model_id| Rule {
                    name: "apple_family",
                    model_id,
                    confidence: APPLE_FAMILY,
                })
            }),
            "samsung" => self.samsung_code(listing, ctx),
            _ => None,
        }
        .or_else(|| {
            self.token_set_match(listing, &brand, ctx).map(|model_id| Rule {
                name: "brand_tokens",
                model_id,
                confidence: if inferred { BRAND_TOKENS_INFERRED } else { BRAND_TOKENS },
            })
        });

        let Some(rule) = rule else {
            return StrategyOutcome::no_match("no brand rule applies");
        };

        let Some(storage_gb) = storage_gb else {
            return StrategyOutcome::no_match(format!(
                "rule {} found model {} but storage is unknown",
                rule.name, rule.model_id
            ));
        };

        match ctx.catalog.capacity_for(rule.model_id, storage_gb) {
            Some(capacity) => StrategyOutcome::Matched(Candidate {
                capacity_id: capacity.id,
                model_id: rule.model_id,
                confidence: rule.confidence,
                details: json!({
                    "rule": rule.name,
                    "storage_gb": storage_gb,
                    "storage_inferred": inferred,
                }),
            }),
            None => StrategyOutcome::ModelWithoutCapacity {
                model_id: rule.model_id,
                storage_gb: Some(storage_gb),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::knowledge_base::KnowledgeCache;
    use crate::services::matching::fixtures::*;

    fn attempt(listing: &ExternalListing) -> StrategyOutcome {
        let catalog = catalog();
        let knowledge = KnowledgeCache::new(1);
        HeuristicStrategy.attempt_match(listing, &context(&catalog, &knowledge))
    }

    fn matched(outcome: StrategyOutcome) -> Candidate {
        match outcome {
            StrategyOutcome::Matched(c) => c,
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn apple_a_number_in_raw_text() {
        let mut l = listing(1, "Apple", "Telefono movil", None);
        l.model_raw = "Movil Apple A2482 256GB".to_string();
        let c = matched(attempt(&l));
        assert_eq!(c.capacity_id, 9);
        assert_eq!(c.confidence, 80);
        assert_eq!(c.details["storage_inferred"], true);
    }

    #[test]
    fn apple_family_ignores_spacing() {
        let c = matched(attempt(&listing(1, "Apple", "iPhone13", Some(128))));
        assert_eq!(c.capacity_id, 7);
        assert_eq!(c.confidence, 72);
    }

    #[test]
    fn samsung_code_prefix() {
        let mut l = listing(1, "Samsung", "Galaxy", Some(128));
        l.model_raw = "Samsung Galaxy SM-G991U 128GB".to_string();
        let c = matched(attempt(&l));
        assert_eq!(c.capacity_id, 30);
        assert_eq!(c.confidence, 75);
    }

    #[test]
    fn generic_brand_tokens_with_inferred_storage() {
        let mut l = listing(1, "Google", "Pixel6", None);
        l.model_raw = "Google Pixel 6 128 GB".to_string();
        let c = matched(attempt(&l));
        assert_eq!(c.capacity_id, 40);
        assert_eq!(c.confidence, 60);

        let declared = matched(attempt(&listing(2, "Google", "Pixel 6", Some(128))));
        assert_eq!(declared.confidence, 65);
    }

    #[test]
    fn unknown_storage_is_no_match() {
        assert!(matches!(
            attempt(&listing(1, "Google", "Pixel 6", None)),
            StrategyOutcome::NoMatch(_)
        ));
    }

    #[test]
    fn token_set_splits_letter_digit_runs() {
        let set = token_set("Galaxy S21", "Samsung");
        assert!(set.contains("s") && set.contains("21"));
        assert!(!set.contains("s21"));
    }
}
