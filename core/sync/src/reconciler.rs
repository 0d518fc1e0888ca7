//! Entity reconciliation against remote records.
//!
//! Every lookup tries its matching keys in priority order and takes the
//! first hit, capped to one record. Ties within a key are broken by the
//! remote's default ordering; keys are expected to be unique in practice.

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use omnisync_common::{RemoteId, Result};
use omnisync_remote::{Domain, RemoteModels};
use omnisync_store::Partner;

/// Ordered list of `(field, value)` keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchKeys {
    keys: Vec<(String, Value)>,
}

impl MatchKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key. Missing or blank values are skipped.
    pub fn key(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.keys.push((field.to_string(), json!(value)));
        }
        self
    }

    /// Reference code of a product.
    pub fn product_code(code: Option<&str>) -> Self {
        Self::new().key("default_code", code)
    }

    /// Tax id first, name second.
    pub fn partner(partner: &Partner) -> Self {
        Self::new()
            .key("vat", partner.vat.as_deref())
            .key("name", Some(partner.name.as_str()))
    }

    /// Exact name.
    pub fn name(name: &str) -> Self {
        Self::new().key("name", Some(name))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// First key value, for ledger lines.
    pub fn describe(&self) -> Option<String> {
        self.keys.first().map(|(field, value)| match value {
            Value::String(s) => format!("{}={}", field, s),
            other => format!("{}={}", field, other),
        })
    }
}

/// How a dependency was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found(RemoteId),
    Created(RemoteId),
}

impl Resolution {
    pub fn id(self) -> RemoteId {
        match self {
            Self::Found(id) | Self::Created(id) => id,
        }
    }

    pub fn was_created(self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Maps local entities to remote counterparts.
#[derive(Clone, Copy)]
pub struct Reconciler<'a> {
    remote: RemoteModels<'a>,
}

impl<'a> Reconciler<'a> {
    pub fn new(remote: RemoteModels<'a>) -> Self {
        Self { remote }
    }

    /// Find a remote record, trying `keys` in order.
    pub async fn find_remote(&self, model: &str, keys: &MatchKeys) -> Result<Option<RemoteId>> {
        for (field, value) in &keys.keys {
            let domain = Domain::new().eq(field.as_str(), value.clone());
            let ids = self.remote.search(model, &domain, Some(1)).await?;
            if let Some(id) = ids.first() {
                debug!(model, field = %field, remote_id = %id, "Matched remote record");
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }

    /// Find a remote record or create it from `values`.
    pub async fn find_or_create(
        &self,
        model: &str,
        keys: &MatchKeys,
        values: Map<String, Value>,
    ) -> Result<Resolution> {
        if let Some(id) = self.find_remote(model, keys).await? {
            return Ok(Resolution::Found(id));
        }
        let id = self.remote.create(model, values).await?;
        info!(model, remote_id = %id, key = ?keys.describe(), "Created remote record");
        Ok(Resolution::Created(id))
    }

    /// Remote product variant by reference code.
    pub async fn product(&self, code: Option<&str>) -> Result<Option<RemoteId>> {
        self.find_remote("product.product", &MatchKeys::product_code(code))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnisync_remote::MemoryRemote;

    fn remote() -> MemoryRemote {
        let remote = MemoryRemote::new("db", "u", "p");
        remote
            .define_model("product.product", &["name", "default_code"])
            .define_model("res.partner", &["name", "vat", "is_company"]);
        remote
    }

    #[test]
    fn test_blank_keys_skipped() {
        let keys = MatchKeys::new().key("vat", Some("  ")).key("name", None);
        assert!(keys.is_empty());
        assert_eq!(MatchKeys::name("Acme").describe().as_deref(), Some("name=Acme"));
    }

    #[tokio::test]
    async fn test_code_match_wins_over_name() {
        let remote = remote();
        remote.insert("product.product", json!({"name": "Drill", "default_code": "OTHER"}));
        let by_code = remote.insert("product.product", json!({"name": "Cordless", "default_code": "D-1"}));

        let reconciler = Reconciler::new(RemoteModels::new(&remote));
        let keys = MatchKeys::product_code(Some("D-1")).key("name", Some("Drill"));
        let found = reconciler.find_remote("product.product", &keys).await.unwrap();
        assert_eq!(found, Some(by_code));
    }

    #[tokio::test]
    async fn test_searches_are_capped_to_one() {
        let remote = remote();
        remote.insert("res.partner", json!({"name": "Acme"}));
        let reconciler = Reconciler::new(RemoteModels::new(&remote));

        reconciler
            .find_remote("res.partner", &MatchKeys::name("Acme"))
            .await
            .unwrap();
        let calls = remote.calls_to("res.partner", "search");
        assert_eq!(calls[0].kwargs.get("limit"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_partner_falls_back_to_name() {
        let remote = remote();
        let acme = remote.insert("res.partner", json!({"name": "Acme", "vat": false}));
        let reconciler = Reconciler::new(RemoteModels::new(&remote));

        let partner = Partner::new("Acme").with_vat("900123");
        let found = reconciler
            .find_remote("res.partner", &MatchKeys::partner(&partner))
            .await
            .unwrap();
        assert_eq!(found, Some(acme));
        assert_eq!(remote.calls_to("res.partner", "search").len(), 2);
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let remote = remote();
        let reconciler = Reconciler::new(RemoteModels::new(&remote));
        let values = json!({"name": "Acme", "is_company": true});

        let first = reconciler
            .find_or_create("res.partner", &MatchKeys::name("Acme"), values.as_object().cloned().unwrap())
            .await
            .unwrap();
        let second = reconciler
            .find_or_create("res.partner", &MatchKeys::name("Acme"), values.as_object().cloned().unwrap())
            .await
            .unwrap();

        assert!(first.was_created());
        assert_eq!(second, Resolution::Found(first.id()));
        assert_eq!(remote.records("res.partner").len(), 1);
    }
}
