//! MCP method handling on top of the [`Dispatcher`].
//!
//! Transports hand one parsed [`JsonRpcRequest`] to [`McpHandler::handle`] and ship back
//! whatever it returns. Tool failures stay inside the `tools/call` result; only protocol
//! misuse (unknown method, malformed params) becomes a JSON-RPC error.

use crate::dispatch::Dispatcher;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use rmcp::model::{ErrorCode, JsonObject};
use serde::Deserialize;
use serde_json::{Value, json};

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &["2025-06-18", "2025-03-26", "2024-11-05", "2024-10-07"];
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Name/version reported in `initialize`.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<JsonObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    protocol_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct McpHandler {
    dispatcher: Dispatcher,
    identity: ServerIdentity,
}

impl McpHandler {
    #[must_use]
    pub fn new(dispatcher: Dispatcher, identity: ServerIdentity) -> Self {
        Self {
            dispatcher,
            identity,
        }
    }

    /// Handle one message. Notifications produce no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let Some(id) = id else {
            tracing::debug!(%method, "notification received");
            return None;
        };

        let outcome = match method.as_str() {
            "initialize" => Ok(self.initialize(params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.dispatcher.list_tools() })),
            "tools/call" => self.call_tool(params).await,
            other => Err((
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::error(Some(id), code, message),
        })
    }

    fn initialize(&self, params: Option<Value>) -> Value {
        let requested = params
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
            .and_then(|p| p.protocol_version);
        let version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()))
            .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string());

        json!({
            "protocolVersion": version,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.identity.name,
                "version": self.identity.version,
            },
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, (ErrorCode, String)> {
        let params: CallToolParams = params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
            .map_err(|e| {
                (
                    ErrorCode::INVALID_PARAMS,
                    format!("Invalid params for tools/call: {e}"),
                )
            })?;

        let result = self
            .dispatcher
            .dispatch(&params.name, params.arguments)
            .await;
        serde_json::to_value(result)
            .map_err(|e| (ErrorCode::INTERNAL_ERROR, format!("serialize result: {e}")))
    }
}
