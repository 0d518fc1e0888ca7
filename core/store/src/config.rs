//! Sync configuration records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use omnisync_common::{Endpoint, EntityKind, Error, RecordId, Result};

/// Brand sentinel selecting every remote product.
pub const ALL_BRANDS: &str = "TOTAL";

/// Per-kind enable flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFlags {
    pub products: bool,
    pub images: bool,
    pub price_lists: bool,
    pub sales: bool,
    pub purchases: bool,
}

impl Default for EntityFlags {
    fn default() -> Self {
        Self {
            products: false,
            images: true,
            price_lists: false,
            sales: false,
            purchases: false,
        }
    }
}

impl EntityFlags {
    /// Check if a kind is enabled.
    pub fn is_enabled(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Products => self.products,
            EntityKind::Images => self.images,
            EntityKind::PriceLists => self.price_lists,
            EntityKind::Sales => self.sales,
            EntityKind::Purchases => self.purchases,
        }
    }

    /// Enable or disable a kind.
    pub fn set(&mut self, kind: EntityKind, enabled: bool) {
        match kind {
            EntityKind::Products => self.products = enabled,
            EntityKind::Images => self.images = enabled,
            EntityKind::PriceLists => self.price_lists = enabled,
            EntityKind::Sales => self.sales = enabled,
            EntityKind::Purchases => self.purchases = enabled,
        }
    }

    /// Enabled kinds in execution order.
    pub fn enabled(&self) -> impl Iterator<Item = EntityKind> + '_ {
        EntityKind::ORDERED
            .into_iter()
            .filter(move |kind| self.is_enabled(*kind))
    }
}

/// Aggregates shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStatistics {
    pub products: u64,
    pub images: u64,
    pub price_lists: u64,
    pub sales: u64,
    pub purchases: u64,
    pub last_sync_date: Option<DateTime<Utc>>,
}

impl SyncStatistics {
    pub fn count(&self, kind: EntityKind) -> u64 {
        match kind {
            EntityKind::Products => self.products,
            EntityKind::Images => self.images,
            EntityKind::PriceLists => self.price_lists,
            EntityKind::Sales => self.sales,
            EntityKind::Purchases => self.purchases,
        }
    }
}

fn default_brands() -> String {
    ALL_BRANDS.to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

/// Connection to one remote instance and what to synchronize with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    #[serde(default)]
    pub id: RecordId,
    pub name: String,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub flags: EntityFlags,
    /// Comma-separated brand names for image sync.
    #[serde(default = "default_brands")]
    pub brands_to_sync: String,
    /// Page size for pull syncs.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Transport timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auto_confirm_purchase_orders: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub stats: SyncStatistics,
}

impl SyncConfiguration {
    /// Create a configuration with default tuning.
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: RecordId::default(),
            name: name.into(),
            endpoint,
            flags: EntityFlags::default(),
            brands_to_sync: default_brands(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            auto_confirm_purchase_orders: false,
            active: true,
            stats: SyncStatistics::default(),
        }
    }

    /// Validate before saving.
    ///
    /// # Errors
    /// - `Validation` for an empty name, a bad endpoint, or zero batch
    ///   size or timeout
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Configuration name is required".to_string()));
        }
        self.endpoint.validate()?;
        if self.batch_size == 0 {
            return Err(Error::Validation("Batch size must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Validation("Timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured brands; the sentinel when none are listed.
    pub fn brands(&self) -> Vec<String> {
        let brands: Vec<String> = self
            .brands_to_sync
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
        if brands.is_empty() {
            vec![ALL_BRANDS.to_string()]
        } else {
            brands
        }
    }
}

/// Check if `brand` is the all-brands sentinel (`TOTAL` or `ALL`).
pub fn is_all_brands(brand: &str) -> bool {
    let brand = brand.trim();
    brand.eq_ignore_ascii_case(ALL_BRANDS) || brand.eq_ignore_ascii_case("ALL")
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnisync_common::Secret;

    fn config() -> SyncConfiguration {
        SyncConfiguration::new(
            "Warehouse",
            Endpoint::new("https://erp.example.com", "prod", "sync", Secret::new("pw")),
        )
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert!(config.flags.images);
        assert!(!config.flags.sales);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.brands(), vec!["TOTAL"]);
        assert!(config.active);
    }

    #[test]
    fn test_import_fills_defaults() {
        let json = r#"{
            "name": "Store B",
            "endpoint": {"url": "http://b:8069", "database": "b", "username": "u", "credential": "p"},
            "flags": {"sales": true}
        }"#;
        let config: SyncConfiguration = serde_json::from_str(json).unwrap();
        assert!(config.flags.sales);
        assert!(config.flags.images);
        assert_eq!(config.batch_size, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut bad = config();
        bad.endpoint.url = "erp.example.com".to_string();
        assert!(matches!(bad.validate(), Err(Error::Validation(_))));

        let mut zero = config();
        zero.batch_size = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_enabled_kinds_in_order() {
        let mut flags = EntityFlags::default();
        flags.set(EntityKind::Purchases, true);
        flags.set(EntityKind::Products, true);
        let kinds: Vec<EntityKind> = flags.enabled().collect();
        assert_eq!(
            kinds,
            vec![EntityKind::Products, EntityKind::Images, EntityKind::Purchases]
        );
    }

    #[test]
    fn test_brand_list() {
        let mut config = config();
        config.brands_to_sync = " Stanley, ,Bosch ".to_string();
        assert_eq!(config.brands(), vec!["Stanley", "Bosch"]);
        assert!(is_all_brands("all"));
        assert!(is_all_brands("TOTAL"));
        assert!(!is_all_brands("Stanley"));
    }
}
