//! Remote session trait definition.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use omnisync_common::{Endpoint, Error, RemoteId, Result};

use crate::domain::Domain;

/// Authenticated session against one remote instance.
///
/// Implementations must be usable from several tasks at once; each call is a
/// blocking round trip from the caller's point of view.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Database the session is bound to.
    fn database(&self) -> &str;

    /// Execute `method` on `model`.
    ///
    /// # Errors
    /// - `Transport` when the request could not complete
    /// - `RemoteFault` when the remote raised an error
    async fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value>;
}

/// Opens sessions. Authentication is performed on every connect.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Authenticate and return a session.
    ///
    /// # Errors
    /// - `Authentication` when credentials are rejected
    /// - `Transport` when the server is unreachable
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration)
        -> Result<Arc<dyn RemoteSession>>;
}

/// Offset/limit window for paged reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    /// First page of the given size.
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// Following page.
    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// Typed helpers over [`RemoteSession::call`].
#[derive(Clone, Copy)]
pub struct RemoteModels<'a> {
    session: &'a dyn RemoteSession,
}

impl<'a> RemoteModels<'a> {
    pub fn new(session: &'a dyn RemoteSession) -> Self {
        Self { session }
    }

    /// Underlying session.
    pub fn session(&self) -> &'a dyn RemoteSession {
        self.session
    }

    /// Search ids, ordered by the remote's default order.
    pub async fn search(
        &self,
        model: &str,
        domain: &Domain,
        limit: Option<usize>,
    ) -> Result<Vec<RemoteId>> {
        let mut kwargs = Map::new();
        if let Some(limit) = limit {
            kwargs.insert("limit".into(), json!(limit));
        }
        let value = self
            .session
            .call(model, "search", vec![domain.to_value()], kwargs)
            .await?;
        parse_ids(model, "search", &value)
    }

    /// Search and read the given fields.
    pub async fn search_read(
        &self,
        model: &str,
        domain: &Domain,
        fields: &[&str],
        page: Option<Page>,
    ) -> Result<Vec<Map<String, Value>>> {
        let mut kwargs = Map::new();
        kwargs.insert("fields".into(), json!(fields));
        if let Some(page) = page {
            kwargs.insert("limit".into(), json!(page.limit));
            kwargs.insert("offset".into(), json!(page.offset));
        }
        let value = self
            .session
            .call(model, "search_read", vec![domain.to_value()], kwargs)
            .await?;
        parse_records(model, "search_read", value)
    }

    /// Count matching records.
    pub async fn search_count(&self, model: &str, domain: &Domain) -> Result<u64> {
        let value = self
            .session
            .call(model, "search_count", vec![domain.to_value()], Map::new())
            .await?;
        value.as_u64().ok_or_else(|| unexpected(model, "search_count", &value))
    }

    /// Read fields of known ids.
    pub async fn read(
        &self,
        model: &str,
        ids: &[RemoteId],
        fields: &[&str],
    ) -> Result<Vec<Map<String, Value>>> {
        let mut kwargs = Map::new();
        kwargs.insert("fields".into(), json!(fields));
        let value = self
            .session
            .call(model, "read", vec![ids_value(ids)], kwargs)
            .await?;
        parse_records(model, "read", value)
    }

    /// Create one record.
    pub async fn create(&self, model: &str, values: Map<String, Value>) -> Result<RemoteId> {
        let value = self
            .session
            .call(model, "create", vec![Value::Object(values)], Map::new())
            .await?;
        // Single dict returns an id; some servers wrap it in a list.
        let id = match &value {
            Value::Array(items) if items.len() == 1 => items[0].as_i64(),
            other => other.as_i64(),
        };
        let id = id.ok_or_else(|| unexpected(model, "create", &value))?;
        debug!(model, remote_id = id, "Created remote record");
        Ok(RemoteId::new(id))
    }

    /// Update records.
    pub async fn write(
        &self,
        model: &str,
        ids: &[RemoteId],
        values: Map<String, Value>,
    ) -> Result<()> {
        self.session
            .call(model, "write", vec![ids_value(ids), Value::Object(values)], Map::new())
            .await?;
        Ok(())
    }

    /// Delete records.
    pub async fn unlink(&self, model: &str, ids: &[RemoteId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.session
            .call(model, "unlink", vec![ids_value(ids)], Map::new())
            .await?;
        Ok(())
    }

    /// Call a record method such as a workflow button.
    pub async fn execute(&self, model: &str, method: &str, ids: &[RemoteId]) -> Result<Value> {
        self.session
            .call(model, method, vec![ids_value(ids)], Map::new())
            .await
    }

    /// Field names the remote currently exposes for `model`.
    pub async fn fields_get(&self, model: &str) -> Result<BTreeSet<String>> {
        let mut kwargs = Map::new();
        kwargs.insert("attributes".into(), json!(["string"]));
        let value = self
            .session
            .call(model, "fields_get", vec![], kwargs)
            .await?;
        match value {
            Value::Object(fields) => Ok(fields.into_iter().map(|(name, _)| name).collect()),
            other => Err(unexpected(model, "fields_get", &other)),
        }
    }

    /// Check that `model` exists remotely with a bounded query.
    ///
    /// # Errors
    /// - `FeatureUnavailable` when the remote rejects the query
    /// - `Transport` errors pass through unchanged
    pub async fn probe(&self, model: &str) -> Result<()> {
        match self.search(model, &Domain::new(), Some(1)).await {
            Ok(_) => Ok(()),
            Err(Error::RemoteFault { message, .. }) => Err(Error::unavailable(
                model,
                format!("model is not installed on the remote instance ({})", message),
            )),
            Err(e) => Err(e),
        }
    }
}

fn ids_value(ids: &[RemoteId]) -> Value {
    Value::Array(ids.iter().map(|id| json!(id.get())).collect())
}

fn unexpected(model: &str, method: &str, value: &Value) -> Error {
    Error::RemoteFault {
        model: model.to_string(),
        method: method.to_string(),
        message: format!("unexpected result shape: {}", value),
    }
}

fn parse_ids(model: &str, method: &str, value: &Value) -> Result<Vec<RemoteId>> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|v| v.as_i64().map(RemoteId::new))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| unexpected(model, method, value))
}

fn parse_records(model: &str, method: &str, value: Value) -> Result<Vec<Map<String, Value>>> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(unexpected(model, method, &other)),
            })
            .collect(),
        other => Err(unexpected(model, method, &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_advances_by_limit() {
        let page = Page::first(50).next().next();
        assert_eq!(page, Page { offset: 100, limit: 50 });
    }

    #[test]
    fn test_parse_ids() {
        let ids = parse_ids("res.partner", "search", &json!([4, 9])).unwrap();
        assert_eq!(ids, vec![RemoteId::new(4), RemoteId::new(9)]);
        assert!(parse_ids("res.partner", "search", &json!({"ids": []})).is_err());
    }
}
