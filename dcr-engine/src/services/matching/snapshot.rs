//! Read-only view of the Catalog Store used for one matching run

use dcr_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

use super::normalize::{descriptive_tokens, normalize_text};
use crate::db;
use crate::models::{CatalogCapacity, CatalogModel};

/// Precomputed matching keys of a catalog model
#[derive(Debug, Clone)]
pub struct ModelKeys {
    pub brand: String,
    pub family: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    models: HashMap<i64, CatalogModel>,
    keys: HashMap<i64, ModelKeys>,
    capacities: HashMap<i64, CatalogCapacity>,
    capacities_by_model: HashMap<i64, Vec<i64>>,
    /// Uppercased vendor code → models carrying it
    code_index: HashMap<String, Vec<i64>>,
    /// Knowledge Base confirmations per model
    confirmations: HashMap<i64, u64>,
    /// Model ids in ascending order, for deterministic iteration
    model_order: Vec<i64>,
}

impl CatalogSnapshot {
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let models = db::catalog::list_models(pool).await?;
        let capacities = db::catalog::list_all_capacities(pool).await?;
        let confirmations = db::knowledge::confirmations_by_model(pool).await?;

        let snapshot = Self::from_parts(models, capacities, confirmations);
        tracing::debug!(
            models = snapshot.models.len(),
            capacities = snapshot.capacities.len(),
            "Catalog snapshot loaded"
        );
        Ok(snapshot)
    }

    pub fn from_parts(
        models: Vec<CatalogModel>,
        capacities: Vec<CatalogCapacity>,
        confirmations: HashMap<i64, u64>,
    ) -> Self {
        let mut snapshot = CatalogSnapshot {
            confirmations,
            ..Default::default()
        };
        for model in models {
            snapshot.add_model(model, Vec::new());
        }
        for capacity in capacities {
            snapshot.add_capacity(capacity);
        }
        snapshot
    }

    /// Add a model (and its capacities) created after the snapshot was taken
    pub fn add_model(&mut self, model: CatalogModel, capacities: Vec<CatalogCapacity>) {
        let keys = ModelKeys {
            brand: normalize_text(&model.brand),
            family: normalize_text(&model.device_type),
            tokens: descriptive_tokens(&model.description, &model.brand),
        };
        for code in &model.vendor_codes {
            let ids = self.code_index.entry(code.to_uppercase()).or_default();
            if !ids.contains(&model.id) {
                ids.push(model.id);
            }
        }
        if let Err(pos) = self.model_order.binary_search(&model.id) {
            self.model_order.insert(pos, model.id);
        }
        self.keys.insert(model.id, keys);
        self.models.insert(model.id, model);
        for capacity in capacities {
            self.add_capacity(capacity);
        }
    }

    fn add_capacity(&mut self, capacity: CatalogCapacity) {
        let ids = self.capacities_by_model.entry(capacity.model_id).or_default();
        if !ids.contains(&capacity.id) {
            ids.push(capacity.id);
        }
        self.capacities.insert(capacity.id, capacity);
    }

    pub fn model(&self, model_id: i64) -> Option<&CatalogModel> {
        self.models.get(&model_id)
    }

    pub fn keys(&self, model_id: i64) -> Option<&ModelKeys> {
        self.keys.get(&model_id)
    }

    pub fn capacity(&self, capacity_id: i64) -> Option<&CatalogCapacity> {
        self.capacities.get(&capacity_id)
    }

    /// Capacity of `model_id` with exactly `storage_gb`
    pub fn capacity_for(&self, model_id: i64, storage_gb: u32) -> Option<&CatalogCapacity> {
        self.capacities_by_model
            .get(&model_id)?
            .iter()
            .filter_map(|id| self.capacities.get(id))
            .find(|c| c.storage_gb == storage_gb)
    }

    /// Capacities of `model_id`, ordered by storage
    pub fn capacities_of(&self, model_id: i64) -> Vec<&CatalogCapacity> {
        let mut capacities: Vec<&CatalogCapacity> = self
            .capacities_by_model
            .get(&model_id)
            .map(|ids| ids.iter().filter_map(|id| self.capacities.get(id)).collect())
            .unwrap_or_default();
        capacities.sort_by_key(|c| (c.storage_gb, c.id));
        capacities
    }

    /// Every capacity, ordered by id
    pub fn all_capacities(&self) -> Vec<&CatalogCapacity> {
        let mut capacities: Vec<&CatalogCapacity> = self.capacities.values().collect();
        capacities.sort_by_key(|c| c.id);
        capacities
    }

    pub fn models_with_code(&self, code: &str) -> &[i64] {
        self.code_index
            .get(&code.trim().to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Models having any vendor code that starts with `prefix`
    pub fn models_with_code_prefix(&self, prefix: &str) -> Vec<i64> {
        let prefix = prefix.to_uppercase();
        let mut ids: Vec<i64> = self
            .code_index
            .iter()
            .filter(|(code, _)| code.starts_with(&prefix))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Model ids in ascending order
    pub fn model_ids(&self) -> &[i64] {
        &self.model_order
    }

    pub fn confirmations(&self, model_id: i64) -> u64 {
        self.confirmations.get(&model_id).copied().unwrap_or(0)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn model(id: i64, description: &str, codes: &[&str]) -> CatalogModel {
        CatalogModel {
            id,
            description: description.to_string(),
            device_type: "Smartphone".to_string(),
            brand: "Apple".to_string(),
            vendor_codes: codes.iter().map(|c| c.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn capacity(id: i64, model_id: i64, storage_gb: u32) -> CatalogCapacity {
        CatalogCapacity {
            id,
            model_id,
            storage_gb,
            prices: BTreeMap::new(),
        }
    }

    #[test]
    fn lookups() {
        let snapshot = CatalogSnapshot::from_parts(
            vec![model(2, "iPhone 13", &["A2633"]), model(1, "iPhone 12", &["A2403"])],
            vec![capacity(7, 2, 128), capacity(8, 2, 256), capacity(3, 1, 64)],
            HashMap::from([(2, 4)]),
        );

        assert_eq!(snapshot.model_ids(), &[1, 2]);
        assert_eq!(snapshot.capacity_for(2, 256).map(|c| c.id), Some(8));
        assert!(snapshot.capacity_for(2, 512).is_none());
        assert_eq!(snapshot.models_with_code("a2633"), &[2]);
        assert_eq!(snapshot.confirmations(2), 4);
        assert_eq!(snapshot.confirmations(1), 0);
        assert_eq!(snapshot.keys(2).unwrap().tokens, vec!["iphone", "13"]);
    }

    #[test]
    fn added_models_are_visible() {
        let mut snapshot = CatalogSnapshot::default();
        snapshot.add_model(model(5, "iPhone 15", &[]), vec![capacity(50, 5, 128)]);
        assert_eq!(snapshot.model_count(), 1);
        assert_eq!(snapshot.capacities_of(5).len(), 1);
    }
}
