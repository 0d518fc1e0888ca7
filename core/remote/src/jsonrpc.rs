//! JSON-RPC transport for remote instances.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use omnisync_common::{Endpoint, Error, Result, Secret};

use crate::session::{Connector, RemoteSession};

/// Path of the JSON-RPC dispatcher relative to the base URL.
const RPC_PATH: &str = "/jsonrpc";

/// Longest response body echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

impl RpcError {
    fn describe(&self) -> String {
        match &self.data {
            Some(data) if !data.message.is_empty() => {
                if data.name.is_empty() {
                    data.message.clone()
                } else {
                    format!("{}: {}", data.name, data.message)
                }
            }
            _ => self.message.clone(),
        }
    }
}

/// Low-level dispatcher shared by authentication and object calls.
struct Transport {
    http: Client,
    rpc_url: String,
    timeout: Duration,
    request_id: AtomicU64,
}

impl Transport {
    /// Build the HTTP client.
    ///
    /// The timeout is set on the client itself so it covers connect, request
    /// and body read for every call issued through it.
    fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("omnisync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            rpc_url: format!("{}{}", base_url, RPC_PATH),
            timeout,
            request_id: AtomicU64::new(1),
        })
    }

    async fn dispatch(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": id,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(Error::Transport(format!("HTTP {} - {}", status, preview)));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse RPC response: {}", e)))?;

        match (parsed.result, parsed.error) {
            (_, Some(error)) => Err(Error::RemoteFault {
                model: service.to_string(),
                method: method.to_string(),
                message: error.describe(),
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Transport(format!("Request timed out after {:?}", self.timeout))
        } else if err.is_connect() {
            Error::Transport(format!("Connection failed: {}", err))
        } else {
            Error::Transport(err.to_string())
        }
    }
}

/// Authenticated JSON-RPC session.
pub struct JsonRpcSession {
    transport: Transport,
    database: String,
    uid: i64,
    credential: Secret,
}

impl JsonRpcSession {
    /// Authenticate against the endpoint.
    ///
    /// # Errors
    /// - `Authentication` when the server rejects the credentials or database
    /// - `Transport` when the server cannot be reached within `timeout`
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        let transport = Transport::new(&endpoint.base_url(), timeout)?;

        let result = transport
            .dispatch(
                "common",
                "authenticate",
                vec![
                    json!(endpoint.database),
                    json!(endpoint.username),
                    json!(endpoint.credential.expose()),
                    json!({}),
                ],
            )
            .await
            .map_err(|e| match e {
                Error::RemoteFault { message, .. } => Error::Authentication(message),
                other => other,
            })?;

        let uid = match result.as_i64() {
            Some(uid) if uid > 0 => uid,
            _ => {
                warn!(url = %endpoint.base_url(), database = %endpoint.database, "Authentication rejected");
                return Err(Error::Authentication(format!(
                    "Credentials rejected for {}@{}",
                    endpoint.username, endpoint.database
                )));
            }
        };

        info!(url = %endpoint.base_url(), database = %endpoint.database, uid, "Authenticated with remote");

        Ok(Self {
            transport,
            database: endpoint.database.clone(),
            uid,
            credential: endpoint.credential.clone(),
        })
    }

    /// User id assigned by the remote.
    pub fn uid(&self) -> i64 {
        self.uid
    }
}

#[async_trait]
impl RemoteSession for JsonRpcSession {
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
        debug!(model, method, "RPC call");
        self.transport
            .dispatch(
                "object",
                "execute_kw",
                vec![
                    json!(self.database),
                    json!(self.uid),
                    json!(self.credential.expose()),
                    json!(model),
                    json!(method),
                    Value::Array(args),
                    Value::Object(kwargs),
                ],
            )
            .await
            .map_err(|e| match e {
                Error::RemoteFault { message, .. } => Error::RemoteFault {
                    model: model.to_string(),
                    method: method.to_string(),
                    message,
                },
                other => other,
            })
    }
}

/// Connector opening [`JsonRpcSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcConnector;

#[async_trait]
impl Connector for JsonRpcConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>> {
        let session = JsonRpcSession::connect(endpoint, timeout).await?;
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_description_prefers_data() {
        let err: RpcError = serde_json::from_value(json!({
            "code": 200,
            "message": "Odoo Server Error",
            "data": {"name": "builtins.KeyError", "message": "purchase.order"}
        }))
        .unwrap();
        assert_eq!(err.describe(), "builtins.KeyError: purchase.order");

        let bare: RpcError = serde_json::from_value(json!({"message": "Access Denied"})).unwrap();
        assert_eq!(bare.describe(), "Access Denied");
    }

    #[test]
    fn test_response_parsing() {
        let ok: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": [1, 2]})).unwrap();
        assert_eq!(ok.result, Some(json!([1, 2])));
        assert!(ok.error.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let endpoint = Endpoint::new("http://127.0.0.1:9", "db", "user", Secret::new("pw"));
        let err = JsonRpcSession::connect(&endpoint, Duration::from_millis(500))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Transport(_)));
    }
}
