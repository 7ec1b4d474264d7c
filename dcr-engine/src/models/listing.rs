//! External price-feed listings

use serde::{Deserialize, Serialize};

use super::Price;

/// One record as delivered by the feed ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedListing {
    pub modelo_raw: String,
    pub modelo_norm: String,
    pub tipo: String,
    pub marca: String,
    #[serde(default)]
    pub almacenamiento_gb: Option<u32>,
    pub precio_b2b: Price,
    #[serde(default)]
    pub vendor_code: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub cpu: Option<String>,
}

/// A listing as staged inside a batch. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalListing {
    /// 1-based ordinal inside the owning batch
    pub staging_item_id: i64,
    pub model_raw: String,
    pub model_norm: String,
    pub device_family: String,
    pub brand: String,
    pub storage_gb: Option<u32>,
    pub price: Price,
    pub vendor_code: Option<String>,
    pub year: Option<i32>,
    pub cpu: Option<String>,
}

impl ExternalListing {
    pub fn from_feed(staging_item_id: i64, feed: FeedListing) -> Self {
        Self {
            staging_item_id,
            model_raw: feed.modelo_raw.trim().to_string(),
            model_norm: feed.modelo_norm.trim().to_string(),
            device_family: feed.tipo.trim().to_string(),
            brand: feed.marca.trim().to_string(),
            storage_gb: feed.almacenamiento_gb,
            price: feed.precio_b2b,
            vendor_code: feed
                .vendor_code
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            year: feed.year,
            cpu: feed.cpu.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn to_feed(&self) -> FeedListing {
        FeedListing {
            modelo_raw: self.model_raw.clone(),
            modelo_norm: self.model_norm.clone(),
            tipo: self.device_family.clone(),
            marca: self.brand.clone(),
            almacenamiento_gb: self.storage_gb,
            precio_b2b: self.price,
            vendor_code: self.vendor_code.clone(),
            year: self.year,
            cpu: self.cpu.clone(),
        }
    }

    /// Model text used for matching: the normalized name, or the raw name when
    /// the feed left the normalized one empty
    pub fn match_text(&self) -> &str {
        if self.model_norm.is_empty() {
            &self.model_raw
        } else {
            &self.model_norm
        }
    }
}

/// Validate a feed before it is staged. Returns every problem found, each
/// prefixed with the 1-based position of the offending listing.
pub fn validate_feed(listings: &[FeedListing]) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    if listings.is_empty() {
        problems.push("feed contains no listings".to_string());
    }

    for (index, listing) in listings.iter().enumerate() {
        let item = index + 1;
        if listing.modelo_norm.trim().is_empty() && listing.modelo_raw.trim().is_empty() {
            problems.push(format!("listing {}: model name is required", item));
        }
        if listing.marca.trim().is_empty() {
            problems.push(format!("listing {}: brand (marca) is required", item));
        }
        if listing.precio_b2b.is_negative() {
            problems.push(format!(
                "listing {}: price must not be negative (got {})",
                item, listing.precio_b2b
            ));
        }
        if listing.almacenamiento_gb == Some(0) {
            problems.push(format!("listing {}: storage of 0 GB is not a valid capacity", item));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(model: &str, brand: &str, price: f64) -> FeedListing {
        FeedListing {
            modelo_raw: model.to_string(),
            modelo_norm: model.to_string(),
            tipo: "Smartphone".to_string(),
            marca: brand.to_string(),
            almacenamiento_gb: Some(128),
            precio_b2b: Price::from_units(price),
            vendor_code: Some("  ".to_string()),
            year: None,
            cpu: None,
        }
    }

    #[test]
    fn staging_trims_and_drops_blank_codes() {
        let listing = ExternalListing::from_feed(3, feed(" iPhone 13 ", "Apple", 450.0));
        assert_eq!(listing.staging_item_id, 3);
        assert_eq!(listing.model_norm, "iPhone 13");
        assert!(listing.vendor_code.is_none());
    }

    #[test]
    fn validation_reports_every_problem_with_position() {
        let listings = vec![feed("iPhone 13", "Apple", 450.0), feed("", "", -1.0)];
        let problems = validate_feed(&listings).unwrap_err();
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().all(|p| p.starts_with("listing 2:")));
    }

    #[test]
    fn empty_feed_is_rejected() {
        assert!(validate_feed(&[]).is_err());
    }
}
