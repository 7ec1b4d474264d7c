//! Phase 3: weighted token similarity against every catalog model

use serde_json::json;

use super::normalize::{descriptive_tokens, field_similarity, token_dice};
use super::{compare_models, Candidate, MatchContext, MatchStrategy, StrategyOutcome};
use crate::models::{ExternalListing, MatchAlgorithm};

const BRAND_WEIGHT: f64 = 0.2;
const FAMILY_WEIGHT: f64 = 0.2;
const DESCRIPTIVE_WEIGHT: f64 = 0.6;

/// Fuzzy matches never claim more than this
const MAX_CONFIDENCE: u8 = 90;
const MIN_CONFIDENCE: u8 = 60;

#[derive(Debug, Clone, Copy)]
struct Scored {
    model_id: i64,
    confidence: u8,
    score: f64,
}

pub struct FuzzyStrategy;

impl FuzzyStrategy {
    /// Score of `listing` against one model, `None` when the names conflict
    fn score(listing: &ExternalListing, tokens: &[String], model_id: i64, ctx: &MatchContext<'_>) -> Option<Scored> {
        let model = ctx.catalog.model(model_id)?;
        let keys = ctx.catalog.keys(model_id)?;

        let descriptive = token_dice(tokens, &keys.tokens)?;
        if descriptive == 0.0 {
            return None;
        }
        let brand = field_similarity(&listing.brand, &model.brand);
        let family = field_similarity(&listing.device_family, &model.device_type);

        let score = BRAND_WEIGHT * brand + FAMILY_WEIGHT * family + DESCRIPTIVE_WEIGHT * descriptive;
        let confidence = ((score * 100.0).round() as u8).min(MAX_CONFIDENCE);
        Some(Scored {
            model_id,
            confidence,
            score,
        })
    }

    fn better(ctx: &MatchContext<'_>, a: &Scored, b: &Scored) -> bool {
        a.confidence
            .cmp(&b.confidence)
            .then_with(|| compare_models(ctx.catalog, a.model_id, b.model_id))
            .is_gt()
    }
}

impl MatchStrategy for FuzzyStrategy {
    fn algorithm(&self) -> MatchAlgorithm {
        MatchAlgorithm::Fuzzy
    }

    fn min_confidence(&self) -> u8 {
        MIN_CONFIDENCE
    }

    fn attempt_match(&self, listing: &ExternalListing, ctx: &MatchContext<'_>) -> StrategyOutcome {
        let Some(storage_gb) = listing.storage_gb else {
            return StrategyOutcome::no_match("storage not declared");
        };

        let tokens = descriptive_tokens(listing.match_text(), &listing.brand);
        if tokens.is_empty() {
            return StrategyOutcome::no_match("no descriptive tokens");
        }

        let mut best_overall: Option<Scored> = None;
        let mut best_with_capacity: Option<(Scored, i64)> = None;

        for &model_id in ctx.catalog.model_ids() {
            let Some(scored) = Self::score(listing, &tokens, model_id, ctx) else {
                continue;
            };

            if best_overall.map_or(true, |best| Self::better(ctx, &scored, &best)) {
                best_overall = Some(scored);
            }

            if let Some(capacity) = ctx.catalog.capacity_for(model_id, storage_gb) {
                if best_with_capacity.map_or(true, |(best, _)| Self::better(ctx, &scored, &best)) {
                    best_with_capacity = Some((scored, capacity.id));
                }
            }
        }

        if let Some((best, capacity_id)) = best_with_capacity {
            if best.confidence >= MIN_CONFIDENCE {
                return StrategyOutcome::Matched(Candidate {
                    capacity_id,
                    model_id: best.model_id,
                    confidence: best.confidence,
                    details: json!({
                        "tokens": tokens,
                        "score": (best.score * 1000.0).round() / 1000.0,
                    }),
                });
            }
        }

        match best_overall {
            Some(best) if best.confidence >= MIN_CONFIDENCE => StrategyOutcome::ModelWithoutCapacity {
                model_id: best.model_id,
                storage_gb: Some(storage_gb),
            },
            Some(best) => StrategyOutcome::no_match(format!(
                "best candidate model {} scored {}",
                best.model_id, best.confidence
            )),
            None => StrategyOutcome::no_match("no comparable catalog model"),
        }
    }
}
