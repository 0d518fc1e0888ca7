//! In-memory remote instance for testing.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use omnisync_common::{Endpoint, Error, RemoteId, Result};

use crate::domain::Domain;
use crate::session::{Connector, RemoteSession};

/// A call as seen by the in-memory instance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Clone)]
enum Fault {
    Remote(String),
    Transport(String),
}

#[derive(Debug, Default)]
struct Table {
    fields: BTreeSet<String>,
    records: BTreeMap<i64, Map<String, Value>>,
}

#[derive(Debug)]
struct Instance {
    username: String,
    credential: String,
    tables: BTreeMap<String, Table>,
    faults: BTreeMap<(String, String), Fault>,
    calls: Vec<RecordedCall>,
    next_id: i64,
}

/// In-memory remote instance.
///
/// Behaves like a small business-management server: models must be defined
/// with their field names, unknown fields in `create`/`write` are rejected,
/// and `x2many` create commands (`[0, 0, values]`) materialize records in the
/// `<model>.line` child model. Every call is recorded for inspection.
/// Clones share the same instance.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    database: Arc<str>,
    inner: Arc<RwLock<Instance>>,
}

impl MemoryRemote {
    /// Create an empty instance accepting the given credentials.
    pub fn new(
        database: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            database: Arc::from(database.into()),
            inner: Arc::new(RwLock::new(Instance {
                username: username.into(),
                credential: credential.into(),
                tables: BTreeMap::new(),
                faults: BTreeMap::new(),
                calls: Vec::new(),
                next_id: 1,
            })),
        }
    }

    fn state(&self) -> RwLockWriteGuard<'_, Instance> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Define a model and its field names. Redefining adds fields.
    pub fn define_model(&self, model: &str, fields: &[&str]) -> &Self {
        let mut state = self.state();
        let table = state.tables.entry(model.to_string()).or_default();
        table.fields.extend(fields.iter().map(|f| f.to_string()));
        table.fields.insert("id".to_string());
        self
    }

    /// Remove a model, as if its module were uninstalled.
    pub fn remove_model(&self, model: &str) {
        self.state().tables.remove(model);
    }

    /// Seed a record without going through `call`.
    pub fn insert(&self, model: &str, values: Value) -> RemoteId {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        let mut record = values.as_object().cloned().unwrap_or_default();
        record.insert("id".into(), json!(id));
        state
            .tables
            .entry(model.to_string())
            .or_default()
            .records
            .insert(id, record);
        RemoteId::new(id)
    }

    /// All records of a model, ordered by id.
    pub fn records(&self, model: &str) -> Vec<Map<String, Value>> {
        self.state()
            .tables
            .get(model)
            .map(|t| t.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Single record by id.
    pub fn record(&self, model: &str, id: RemoteId) -> Option<Map<String, Value>> {
        self.state()
            .tables
            .get(model)
            .and_then(|t| t.records.get(&id.get()).cloned())
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Calls received for one model and method.
    pub fn calls_to(&self, model: &str, method: &str) -> Vec<RecordedCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.model == model && c.method == method)
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make `model.method` raise a remote fault.
    pub fn fail_on(&self, model: &str, method: &str, message: &str) {
        self.state().faults.insert(
            (model.to_string(), method.to_string()),
            Fault::Remote(message.to_string()),
        );
    }

    /// Make `model.method` fail at the transport level.
    pub fn drop_connection_on(&self, model: &str, method: &str) {
        self.state().faults.insert(
            (model.to_string(), method.to_string()),
            Fault::Transport(format!("connection reset during {}.{}", model, method)),
        );
    }

    /// Clear injected faults.
    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }
}

fn fault(model: &str, method: &str, message: impl Into<String>) -> Error {
    Error::RemoteFault {
        model: model.to_string(),
        method: method.to_string(),
        message: message.into(),
    }
}

fn usize_kwarg(kwargs: &Map<String, Value>, key: &str) -> Option<usize> {
    kwargs.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

fn ids_arg(model: &str, method: &str, args: &[Value]) -> Result<Vec<i64>> {
    args.first()
        .and_then(Value::as_array)
        .and_then(|ids| ids.iter().map(Value::as_i64).collect::<Option<Vec<_>>>())
        .ok_or_else(|| fault(model, method, "expected a list of ids"))
}

fn project(record: &Map<String, Value>, fields: Option<&Vec<Value>>) -> Value {
    match fields {
        Some(fields) if !fields.is_empty() => {
            let mut out = Map::new();
            out.insert("id".into(), record.get("id").cloned().unwrap_or(Value::Null));
            for name in fields.iter().filter_map(Value::as_str) {
                out.insert(
                    name.to_string(),
                    record.get(name).cloned().unwrap_or(Value::Bool(false)),
                );
            }
            Value::Object(out)
        }
        _ => Value::Object(record.clone()),
    }
}

impl Instance {
    fn table(&self, model: &str, method: &str) -> Result<&Table> {
        self.tables
            .get(model)
            .ok_or_else(|| fault(model, method, format!("Object {} doesn't exist", model)))
    }

    fn table_mut(&mut self, model: &str, method: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(model)
            .ok_or_else(|| fault(model, method, format!("Object {} doesn't exist", model)))
    }

    fn matching(&self, model: &str, method: &str, args: &[Value]) -> Result<Vec<&Map<String, Value>>> {
        let domain = Domain::from_value(args.first().unwrap_or(&Value::Null))
            .map_err(|e| fault(model, method, e.to_string()))?;
        Ok(self
            .table(model, method)?
            .records
            .values()
            .filter(|r| domain.matches(r))
            .collect())
    }

    fn create(&mut self, model: &str, values: &Map<String, Value>) -> Result<i64> {
        let fields = &self.table(model, "create")?.fields;
        if let Some(unknown) = values.keys().find(|k| !fields.contains(*k)) {
            return Err(fault(
                model,
                "create",
                format!("Invalid field '{}' on model '{}'", unknown, model),
            ));
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut record = Map::new();
        let mut children = Vec::new();
        for (key, value) in values {
            match value.as_array() {
                Some(commands) if !commands.is_empty() && commands.iter().all(is_create_command) => {
                    children.extend(commands.iter().filter_map(|c| c.get(2).cloned()));
                    record.insert(key.clone(), json!([]));
                }
                _ => {
                    record.insert(key.clone(), value.clone());
                }
            }
        }
        record.insert("id".into(), json!(id));
        self.table_mut(model, "create")?.records.insert(id, record);

        let child_model = format!("{}.line", model);
        let mut child_ids = Vec::new();
        for child in children {
            let mut child = child.as_object().cloned().unwrap_or_default();
            child.insert("order_id".into(), json!(id));
            child_ids.push(self.create(&child_model, &child)?);
        }
        if !child_ids.is_empty() {
            if let Some(record) = self.table_mut(model, "create")?.records.get_mut(&id) {
                record.insert("order_line".into(), json!(child_ids));
            }
        }
        Ok(id)
    }

    fn dispatch(
        &mut self,
        model: &str,
        method: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value> {
        match method {
            "search" => {
                let offset = usize_kwarg(kwargs, "offset").unwrap_or(0);
                let limit = usize_kwarg(kwargs, "limit").unwrap_or(usize::MAX);
                let ids: Vec<Value> = self
                    .matching(model, method, args)?
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .filter_map(|r| r.get("id").cloned())
                    .collect();
                Ok(Value::Array(ids))
            }
            "search_read" => {
                let offset = usize_kwarg(kwargs, "offset").unwrap_or(0);
                let limit = usize_kwarg(kwargs, "limit").unwrap_or(usize::MAX);
                let fields = kwargs.get("fields").and_then(Value::as_array);
                let rows: Vec<Value> = self
                    .matching(model, method, args)?
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .map(|r| project(r, fields))
                    .collect();
                Ok(Value::Array(rows))
            }
            "search_count" => Ok(json!(self.matching(model, method, args)?.len())),
            "read" => {
                let ids = ids_arg(model, method, args)?;
                let fields = kwargs.get("fields").and_then(Value::as_array);
                let table = self.table(model, method)?;
                Ok(Value::Array(
                    ids.iter()
                        .filter_map(|id| table.records.get(id))
                        .map(|r| project(r, fields))
                        .collect(),
                ))
            }
            "create" => {
                let values = args
                    .first()
                    .and_then(Value::as_object)
                    .ok_or_else(|| fault(model, method, "expected a values dict"))?
                    .clone();
                Ok(json!(self.create(model, &values)?))
            }
            "write" => {
                let ids = ids_arg(model, method, args)?;
                let values = args
                    .get(1)
                    .and_then(Value::as_object)
                    .ok_or_else(|| fault(model, method, "expected a values dict"))?
                    .clone();
                let table = self.table_mut(model, method)?;
                if let Some(unknown) = values.keys().find(|k| !table.fields.contains(*k)) {
                    return Err(fault(model, method, format!("Invalid field '{}'", unknown)));
                }
                for id in ids {
                    if let Some(record) = table.records.get_mut(&id) {
                        record.extend(values.clone());
                    }
                }
                Ok(Value::Bool(true))
            }
            "unlink" => {
                let ids = ids_arg(model, method, args)?;
                let table = self.table_mut(model, method)?;
                for id in ids {
                    table.records.remove(&id);
                }
                Ok(Value::Bool(true))
            }
            "fields_get" => {
                let table = self.table(model, method)?;
                Ok(Value::Object(
                    table
                        .fields
                        .iter()
                        .map(|f| (f.clone(), json!({ "string": f })))
                        .collect(),
                ))
            }
            "button_confirm" => {
                let ids = ids_arg(model, method, args)?;
                let table = self.table_mut(model, method)?;
                for id in ids {
                    if let Some(record) = table.records.get_mut(&id) {
                        record.insert("state".into(), json!("purchase"));
                    }
                }
                Ok(Value::Bool(true))
            }
            other => Err(fault(
                model,
                other,
                format!("The method '{}' does not exist on the model '{}'", other, model),
            )),
        }
    }
}

fn is_create_command(value: &Value) -> bool {
    matches!(
        value.as_array().map(|c| c.as_slice()),
        Some([Value::Number(op), _, Value::Object(_)]) if op.as_i64() == Some(0)
    )
}

#[async_trait]
impl RemoteSession for MemoryRemote {
    fn database(&self) -> &str {
        &self.database
    }

    async fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        let mut state = self.state();
        state.calls.push(RecordedCall {
            model: model.to_string(),
            method: method.to_string(),
            args: args.clone(),
            kwargs: kwargs.clone(),
        });

        match state.faults.get(&(model.to_string(), method.to_string())) {
            Some(Fault::Remote(message)) => return Err(fault(model, method, message.clone())),
            Some(Fault::Transport(message)) => return Err(Error::Transport(message.clone())),
            None => {}
        }

        state.dispatch(model, method, &args, &kwargs)
    }
}

#[async_trait]
impl Connector for MemoryRemote {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>> {
        {
            let state = self.state();
            if endpoint.database != *self.database
                || endpoint.username != state.username
                || endpoint.credential.expose() != state.credential
            {
                return Err(Error::Authentication(format!(
                    "Credentials rejected for {}@{}",
                    endpoint.username, endpoint.database
                )));
            }
        }
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RemoteModels;
    use omnisync_common::Secret;

    fn remote() -> MemoryRemote {
        let remote = MemoryRemote::new("remote_db", "sync", "secret");
        remote
            .define_model("sale.order", &["partner_id", "origin", "order_line", "state"])
            .define_model("sale.order.line", &["order_id", "product_id", "product_uom_qty", "name"]);
        remote
    }

    #[tokio::test]
    async fn test_connect_checks_credentials() {
        let remote = remote();
        let good = Endpoint::new("http://remote", "remote_db", "sync", Secret::new("secret"));
        let bad = Endpoint::new("http://remote", "remote_db", "sync", Secret::new("nope"));

        assert!(remote.connect(&good, Duration::from_secs(1)).await.is_ok());
        let err = remote.connect(&bad, Duration::from_secs(1)).await.err().unwrap();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_create_with_line_commands() {
        let remote = remote();
        let models = RemoteModels::new(&remote);
        let values = json!({
            "partner_id": 7,
            "order_line": [[0, 0, {"product_id": 3, "product_uom_qty": 2.0, "name": "Drill"}]]
        });

        let id = models
            .create("sale.order", values.as_object().cloned().unwrap())
            .await
            .unwrap();

        let lines = remote.records("sale.order.line");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["order_id"], json!(id.get()));
    }

    #[tokio::test]
    async fn test_unknown_field_is_rejected() {
        let remote = remote();
        let models = RemoteModels::new(&remote);
        let values = json!({"partner_id": 1, "is_remote_order": true});

        let err = models
            .create("sale.order", values.as_object().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteFault { .. }));
    }

    #[tokio::test]
    async fn test_probe_unknown_model() {
        let remote = remote();
        let models = RemoteModels::new(&remote);

        assert!(models.probe("sale.order").await.is_ok());
        let err = models.probe("purchase.order").await.unwrap_err();
        assert!(matches!(err, Error::FeatureUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_paged_search_read() {
        let remote = remote();
        for i in 0..5 {
            remote.insert("sale.order", json!({"origin": format!("S{}", i)}));
        }
        let models = RemoteModels::new(&remote);

        let page = models
            .search_read(
                "sale.order",
                &Domain::new(),
                &["origin"],
                Some(crate::Page { offset: 4, limit: 3 }),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["origin"], json!("S4"));
    }

    #[tokio::test]
    async fn test_injected_transport_fault() {
        let remote = remote();
        remote.drop_connection_on("sale.order", "search");
        let models = RemoteModels::new(&remote);

        let err = models.search("sale.order", &Domain::new(), None).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(remote.calls_to("sale.order", "search").len(), 1);
    }
}
