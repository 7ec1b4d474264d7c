//! Change-set computation
//!
//! Pure function of the staged listings, their current match results and a
//! catalog snapshot. Equal inputs always give the same records in the same
//! order: listing records by staging_item_id, then DELETE records by capacity id.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::matching::CatalogSnapshot;
use crate::models::{ChangeKind, ChangeRecord, ExternalListing, MatchResult, Price};

/// DELETE records are certain: the capacity is simply absent from the feed
const DELETE_CONFIDENCE: u8 = 100;

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Sales channel whose prices are compared
    pub channel: String,
    /// Emit DELETE records (only meaningful for a complete run)
    pub include_deletes: bool,
    /// Listings that must not produce a change (rejected in review)
    pub excluded_items: HashSet<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub changes: Vec<ChangeRecord>,
    /// Mapped listings whose capacity is owned by a better listing
    pub duplicates: Vec<i64>,
    /// Listings without a mapped capacity
    pub unmapped: usize,
}

/// Diff one listing's declared price against the capacity's current price
pub fn change_for(
    listing: &ExternalListing,
    result: &MatchResult,
    capacity_id: i64,
    current: Option<Price>,
) -> ChangeRecord {
    let after = listing.price;
    let (kind, delta) = match current {
        None => (ChangeKind::Insert, None),
        Some(before) if before == after => (ChangeKind::Noop, Some(Price::from_cents(0))),
        Some(before) => (ChangeKind::Update, Some(after - before)),
    };

    ChangeRecord {
        staging_item_id: Some(listing.staging_item_id),
        kind,
        modelo_norm: listing.match_text().to_string(),
        capacity_id,
        before: current,
        after: Some(after),
        delta,
        confidence: result.confidence,
        algorithm: Some(result.algorithm),
    }
}

pub fn compute_changes(
    listings: &[ExternalListing],
    results: &[MatchResult],
    catalog: &CatalogSnapshot,
    options: &DiffOptions,
) -> ChangeSet {
    let results: HashMap<i64, &MatchResult> =
        results.iter().map(|r| (r.staging_item_id, r)).collect();

    let mut ordered: Vec<&ExternalListing> = listings.iter().collect();
    ordered.sort_by_key(|l| l.staging_item_id);

    let mut unmapped = 0usize;
    // capacity → listings mapped to it (in staging order)
    let mut by_capacity: BTreeMap<i64, Vec<(&ExternalListing, &MatchResult)>> = BTreeMap::new();

    for listing in &ordered {
        let Some(result) = results.get(&listing.staging_item_id) else {
            unmapped += 1;
            continue;
        };
        let Some(capacity_id) = result.capacity_id else {
            unmapped += 1;
            continue;
        };
        if options.excluded_items.contains(&listing.staging_item_id) {
            continue;
        }
        by_capacity.entry(capacity_id).or_default().push((listing, result));
    }

    let mut changes = Vec::new();
    let mut duplicates = Vec::new();
    let mut matched_capacities = BTreeSet::new();

    for (capacity_id, candidates) in &by_capacity {
        matched_capacities.insert(*capacity_id);

        let owner = candidates.iter().copied().min_by(|(la, ra), (lb, rb)| {
            rb.confidence
                .cmp(&ra.confidence)
                .then_with(|| la.staging_item_id.cmp(&lb.staging_item_id))
        });
        let Some((owner_listing, owner_result)) = owner else {
            continue;
        };

        for (listing, _) in candidates {
            if listing.staging_item_id != owner_listing.staging_item_id {
                duplicates.push(listing.staging_item_id);
            }
        }

        let current = catalog
            .capacity(*capacity_id)
            .and_then(|c| c.price_for(&options.channel));
        changes.push(change_for(owner_listing, owner_result, *capacity_id, current));
    }

    changes.sort_by_key(|c| c.staging_item_id);
    duplicates.sort_unstable();

    if options.include_deletes {
        for capacity in catalog.all_capacities() {
            if matched_capacities.contains(&capacity.id) {
                continue;
            }
            let Some(before) = capacity.price_for(&options.channel) else {
                continue;
            };
            let modelo_norm = catalog
                .model(capacity.model_id)
                .map(|m| m.description.clone())
                .unwrap_or_default();
            changes.push(ChangeRecord {
                staging_item_id: None,
                kind: ChangeKind::Delete,
                modelo_norm,
                capacity_id: capacity.id,
                before: Some(before),
                after: None,
                delta: None,
                confidence: DELETE_CONFIDENCE,
                algorithm: None,
            });
        }
    }

    ChangeSet {
        changes,
        duplicates,
        unmapped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchAlgorithm;
    use crate::services::matching::fixtures::{catalog, listing};
    use serde_json::json;

    fn mapped(id: i64, capacity_id: i64, confidence: u8) -> MatchResult {
        MatchResult {
            staging_item_id: id,
            capacity_id: Some(capacity_id),
            model_id: Some(1),
            confidence,
            algorithm: MatchAlgorithm::Fuzzy,
            needs_review: confidence < 70,
            metadata: json!({}),
        }
    }

    fn priced(id: i64, price: f64) -> ExternalListing {
        let mut l = listing(id, "Apple", "iPhone 13", Some(128));
        l.price = Price::from_units(price);
        l
    }

    fn options(include_deletes: bool) -> DiffOptions {
        DiffOptions {
            channel: "b2b".to_string(),
            include_deletes,
            excluded_items: HashSet::new(),
        }
    }

    #[test]
    fn update_noop_and_insert() {
        let catalog = catalog();
        // capacity 7 is priced 400, 9 is priced 480, 21 has no price
        let listings = vec![priced(1, 450.0), priced(2, 480.0), priced(3, 199.0)];
        let results = vec![mapped(1, 7, 90), mapped(2, 9, 90), mapped(3, 21, 80)];

        let set = compute_changes(&listings, &results, &catalog, &options(false));
        assert_eq!(set.changes.len(), 3);

        let update = &set.changes[0];
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.before, Some(Price::from_units(400.0)));
        assert_eq!(update.after, Some(Price::from_units(450.0)));
        assert_eq!(update.delta, Some(Price::from_units(50.0)));

        assert_eq!(set.changes[1].kind, ChangeKind::Noop);
        assert_eq!(set.changes[2].kind, ChangeKind::Insert);
        assert_eq!(set.changes[2].before, None);
    }

    #[test]
    fn failed_results_produce_no_change() {
        let catalog = catalog();
        let listings = vec![priced(1, 450.0)];
        let results = vec![MatchResult::failed(1, json!({"reason": "no_match"}))];

        let set = compute_changes(&listings, &results, &catalog, &options(false));
        assert!(set.changes.is_empty());
        assert_eq!(set.unmapped, 1);
    }

    #[test]
    fn duplicate_capacity_owned_by_highest_confidence() {
        let catalog = catalog();
        let listings = vec![priced(1, 450.0), priced(2, 460.0), priced(3, 470.0)];
        let results = vec![mapped(1, 7, 80), mapped(2, 7, 90), mapped(3, 7, 90)];

        let set = compute_changes(&listings, &results, &catalog, &options(false));
        assert_eq!(set.changes.len(), 1);
        assert_eq!(set.changes[0].staging_item_id, Some(2));
        assert_eq!(set.duplicates, vec![1, 3]);
    }

    #[test]
    fn deletes_follow_listing_records() {
        let catalog = catalog();
        let listings = vec![priced(1, 450.0)];
        let results = vec![mapped(1, 7, 90)];

        let set = compute_changes(&listings, &results, &catalog, &options(true));
        let kinds: Vec<(ChangeKind, i64)> =
            set.changes.iter().map(|c| (c.kind, c.capacity_id)).collect();
        // priced capacities not in the feed: 9, 20, 30, 40 (21 has no price)
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::Update, 7),
                (ChangeKind::Delete, 9),
                (ChangeKind::Delete, 20),
                (ChangeKind::Delete, 30),
                (ChangeKind::Delete, 40),
            ]
        );
        assert!(set.changes[1].after.is_none());
    }

    #[test]
    fn excluded_listings_are_skipped() {
        let catalog = catalog();
        let listings = vec![priced(1, 450.0)];
        let results = vec![mapped(1, 7, 90)];
        let mut opts = options(false);
        opts.excluded_items.insert(1);

        let set = compute_changes(&listings, &results, &catalog, &opts);
        assert!(set.changes.is_empty());
        assert_eq!(set.unmapped, 0);
    }

    #[test]
    fn same_inputs_same_output() {
        let catalog = catalog();
        let listings = vec![priced(2, 450.0), priced(1, 300.0)];
        let results = vec![mapped(2, 9, 90), mapped(1, 7, 90)];

        let first = compute_changes(&listings, &results, &catalog, &options(true));
        let second = compute_changes(&listings, &results, &catalog, &options(true));
        assert_eq!(first, second);
        assert_eq!(first.changes[0].staging_item_id, Some(1));
    }
}
