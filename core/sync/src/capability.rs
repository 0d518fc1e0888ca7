//! Field capability negotiation.
//!
//! Remote instances differ in version and customization, so optional fields
//! are only sent when the remote model actually exposes them. Required
//! business fields are always sent; a remote model lacking one is a hard
//! failure.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

use omnisync_common::{Error, Result};
use omnisync_remote::RemoteModels;

/// Subset of `desired` present in `schema`, in the order requested.
pub fn allowed_fields<'a>(schema: &BTreeSet<String>, desired: &[&'a str]) -> Vec<&'a str> {
    desired
        .iter()
        .copied()
        .filter(|field| schema.contains(*field))
        .collect()
}

/// Field names one remote model exposes, fetched once per sync call.
#[derive(Debug, Clone)]
pub struct Capabilities {
    model: String,
    fields: BTreeSet<String>,
}

impl Capabilities {
    /// Query the remote schema of `model`.
    pub async fn probe(remote: RemoteModels<'_>, model: &str) -> Result<Self> {
        let fields = remote.fields_get(model).await?;
        debug!(model, fields = fields.len(), "Fetched remote field set");
        Ok(Self {
            model: model.to_string(),
            fields,
        })
    }

    /// Build from a known field list.
    pub fn from_fields<I, S>(model: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model: model.to_string(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn supports(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    /// Start a payload for this model.
    pub fn payload(&self) -> PayloadBuilder<'_> {
        PayloadBuilder {
            capabilities: self,
            values: Map::new(),
            missing: Vec::new(),
        }
    }
}

/// Create/update payload gated by [`Capabilities`].
#[derive(Debug)]
pub struct PayloadBuilder<'a> {
    capabilities: &'a Capabilities,
    values: Map<String, Value>,
    missing: Vec<String>,
}

impl PayloadBuilder<'_> {
    /// Always-sent business field.
    pub fn required(mut self, field: &str, value: impl Into<Value>) -> Self {
        if !self.capabilities.supports(field) {
            self.missing.push(field.to_string());
        }
        self.values.insert(field.to_string(), value.into());
        self
    }

    /// Field sent only when the remote exposes it.
    pub fn optional(mut self, field: &str, value: impl Into<Value>) -> Self {
        if self.capabilities.supports(field) {
            self.values.insert(field.to_string(), value.into());
        } else {
            debug!(model = %self.capabilities.model, field, "Optional field not available remotely");
        }
        self
    }

    /// Finish the payload.
    ///
    /// # Errors
    /// - `FeatureUnavailable` when a required field is missing remotely
    pub fn build(self) -> Result<Map<String, Value>> {
        if !self.missing.is_empty() {
            return Err(Error::unavailable(
                self.capabilities.model.as_str(),
                format!("required fields missing: {}", self.missing.join(", ")),
            ));
        }
        Ok(self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sale_order() -> Capabilities {
        Capabilities::from_fields("sale.order", ["partner_id", "origin", "order_line"])
    }

    #[test]
    fn test_optional_field_is_omitted() {
        let payload = sale_order()
            .payload()
            .required("partner_id", 7)
            .optional("is_remote_order", true)
            .build()
            .unwrap();

        assert_eq!(payload.get("partner_id"), Some(&json!(7)));
        assert!(!payload.contains_key("is_remote_order"));
    }

    #[test]
    fn test_optional_field_is_sent_when_available() {
        let caps = Capabilities::from_fields("sale.order", ["partner_id", "is_remote_order"]);
        let payload = caps
            .payload()
            .required("partner_id", 7)
            .optional("is_remote_order", true)
            .build()
            .unwrap();
        assert_eq!(payload.get("is_remote_order"), Some(&json!(true)));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let err = sale_order()
            .payload()
            .required("partner_id", 7)
            .required("date_order", "2024-01-01 00:00:00")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::FeatureUnavailable { .. }));
        assert!(err.to_string().contains("date_order"));
    }

    #[test]
    fn test_allowed_fields_preserves_order() {
        let schema: BTreeSet<String> = ["b", "a", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(allowed_fields(&schema, &["c", "x", "a"]), vec!["c", "a"]);
    }

    proptest! {
        #[test]
        fn prop_allowed_fields_is_subset_of_both(
            schema in proptest::collection::btree_set("[a-d]{1,2}", 0..8),
            desired in proptest::collection::vec("[a-d]{1,2}", 0..8),
        ) {
            let desired_refs: Vec<&str> = desired.iter().map(String::as_str).collect();
            let allowed = allowed_fields(&schema, &desired_refs);

            for field in &allowed {
                prop_assert!(schema.contains(*field));
                prop_assert!(desired_refs.contains(field));
            }
            let expected = desired_refs.iter().filter(|f| schema.contains(**f)).count();
            prop_assert_eq!(allowed.len(), expected);
        }
    }
}
