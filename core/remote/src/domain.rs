//! Search filters in the remote's domain notation.
//!
//! A domain is a list of `[field, operator, value]` triples combined with
//! AND. Only the operators the engine emits are supported.

use serde_json::{Map, Value};

use omnisync_common::{Error, Result};

/// A single filter condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

/// Conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    conditions: Vec<Condition>,
}

impl Domain {
    /// Match-everything domain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, "=", value)
    }

    /// Add an arbitrary condition.
    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        });
        self
    }

    /// Get the conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Check if this domain matches everything.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Wire representation.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.conditions
                .iter()
                .map(|c| {
                    Value::Array(vec![
                        Value::String(c.field.clone()),
                        Value::String(c.operator.clone()),
                        c.value.clone(),
                    ])
                })
                .collect(),
        )
    }

    /// Parse the wire representation.
    ///
    /// # Errors
    /// - Prefix operators (`|`, `&`, `!`) or malformed triples
    pub fn from_value(value: &Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => return Ok(Self::new()),
            other => {
                return Err(Error::InvalidInput(format!("Domain must be a list, got {}", other)))
            }
        };

        let mut domain = Self::new();
        for item in items {
            match item.as_array().map(|v| v.as_slice()) {
                Some([Value::String(field), Value::String(op), value]) => {
                    domain = domain.filter(field.as_str(), op.as_str(), value.clone());
                }
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "Unsupported domain term: {}",
                        item
                    )))
                }
            }
        }
        Ok(domain)
    }

    /// Evaluate against a record as returned by `read`.
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|c| {
            let actual = lookup(record, &c.field);
            match c.operator.as_str() {
                "=" => loosely_equal(&actual, &c.value),
                "!=" => !loosely_equal(&actual, &c.value),
                "in" => c
                    .value
                    .as_array()
                    .is_some_and(|vals| vals.iter().any(|v| loosely_equal(&actual, v))),
                "ilike" => match (actual.as_str(), c.value.as_str()) {
                    (Some(a), Some(needle)) => a.to_lowercase().contains(&needle.to_lowercase()),
                    _ => false,
                },
                _ => false,
            }
        })
    }
}

/// Resolve a possibly dotted field path.
///
/// Relational values are `[id, display_name]` pairs; `.name` on such a pair
/// yields the display name.
fn lookup(record: &Map<String, Value>, path: &str) -> Value {
    let mut parts = path.split('.');
    let Some(head) = parts.next() else {
        return Value::Bool(false);
    };
    let mut current = record.get(head).cloned().unwrap_or(Value::Bool(false));

    for part in parts {
        current = match current {
            Value::Array(pair) if pair.len() == 2 && part == "name" => pair[1].clone(),
            Value::Array(pair) if pair.len() == 2 && part == "id" => pair[0].clone(),
            Value::Object(map) => map.get(part).cloned().unwrap_or(Value::Bool(false)),
            _ => Value::Bool(false),
        };
    }
    current
}

fn is_falsy(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Bool(false))
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        // Relational pair compared against an id
        (Value::Array(pair), Value::Number(_)) if pair.len() == 2 => {
            loosely_equal(&pair[0], expected)
        }
        (a, b) if is_falsy(a) && is_falsy(b) => true,
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_wire_roundtrip() {
        let domain = Domain::new().eq("default_code", "SKU-1").eq("active", true);
        assert_eq!(
            domain.to_value(),
            json!([["default_code", "=", "SKU-1"], ["active", "=", true]])
        );
        assert_eq!(Domain::from_value(&domain.to_value()).unwrap(), domain);
    }

    #[test]
    fn test_prefix_operators_rejected() {
        let value = json!(["|", ["vat", "=", "X"], ["name", "=", "Y"]]);
        assert!(Domain::from_value(&value).is_err());
    }

    #[test]
    fn test_matches_relational_name() {
        let rec = record(json!({"product_brand_id": [3, "Stanley"], "default_code": "A"}));
        assert!(Domain::new().eq("product_brand_id.name", "Stanley").matches(&rec));
        assert!(!Domain::new().eq("product_brand_id.name", "Bosch").matches(&rec));
        assert!(Domain::new().eq("product_brand_id", 3).matches(&rec));
    }

    #[test]
    fn test_matches_missing_field_as_false() {
        let rec = record(json!({"name": "Hammer"}));
        assert!(Domain::new().eq("barcode", false).matches(&rec));
        assert!(Domain::new().filter("name", "ilike", "hamm").matches(&rec));
        assert!(Domain::new().filter("id", "in", json!([1, 2])).matches(&record(json!({"id": 2}))));
    }
}
