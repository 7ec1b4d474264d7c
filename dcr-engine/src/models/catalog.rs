//! Catalog Store records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Price;

/// Device model (one per commercial model, many capacities)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogModel {
    pub id: i64,
    pub description: String,
    pub device_type: String,
    pub brand: String,
    /// Hardware identifiers that point unambiguously at this model (A-numbers, SM- codes...)
    pub vendor_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Storage variant of a model: the unit that carries prices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogCapacity {
    pub id: i64,
    pub model_id: i64,
    pub storage_gb: u32,
    /// Sales channel → price
    pub prices: BTreeMap<String, Price>,
}

impl CatalogCapacity {
    pub fn price_for(&self, channel: &str) -> Option<Price> {
        self.prices.get(channel).copied()
    }
}

/// Request to create a model together with its capacities
#[derive(Debug, Clone, Deserialize)]
pub struct NewCatalogModel {
    pub description: String,
    pub device_type: String,
    pub brand: String,
    #[serde(default)]
    pub vendor_codes: Vec<String>,
    pub capacities: Vec<NewCatalogCapacity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCatalogCapacity {
    pub storage_gb: u32,
    #[serde(default)]
    pub prices: BTreeMap<String, Price>,
}

impl NewCatalogModel {
    pub fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("model description is required".to_string());
        }
        if self.brand.trim().is_empty() {
            return Err("model brand is required".to_string());
        }
        if self.capacities.is_empty() {
            return Err("at least one capacity is required".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for capacity in &self.capacities {
            if capacity.storage_gb == 0 {
                return Err("capacity storage_gb must be positive".to_string());
            }
            if !seen.insert(capacity.storage_gb) {
                return Err(format!("duplicate capacity {} GB", capacity.storage_gb));
            }
        }
        Ok(())
    }
}
