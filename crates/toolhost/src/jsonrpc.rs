//! JSON-RPC 2.0 envelopes exchanged over both transports.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::ALLOW},
    response::{IntoResponse as _, Response},
};
use rmcp::model::{ErrorCode, ErrorData, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Server-defined code used for transport misuse (unsupported HTTP verb).
pub const TRANSPORT_ERROR: ErrorCode = ErrorCode(-32000);

/// One inbound request or notification (no `id`).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `null` only for errors raised before the request id could be read.
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorData::new(code, message.into(), None)),
        }
    }
}

/// Why an HTTP body could not be turned into a [`JsonRpcRequest`].
#[derive(Debug, Clone)]
pub enum ParseFailure {
    /// Not JSON at all.
    Parse(String),
    /// JSON, but not a single request object.
    Invalid(String),
}

impl ParseFailure {
    #[must_use]
    pub fn into_response(self) -> JsonRpcResponse {
        match self {
            Self::Parse(msg) => {
                JsonRpcResponse::error(None, ErrorCode::PARSE_ERROR, format!("Parse error: {msg}"))
            }
            Self::Invalid(msg) => JsonRpcResponse::error(
                None,
                ErrorCode::INVALID_REQUEST,
                format!("Invalid Request: {msg}"),
            ),
        }
    }
}

/// Parse one JSON-RPC request from a raw body.
///
/// # Errors
///
/// Returns [`ParseFailure`] for non-JSON bodies, batches, and objects that are not requests.
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, ParseFailure> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ParseFailure::Parse(e.to_string()))?;
    if value.is_array() {
        return Err(ParseFailure::Invalid(
            "batch requests are not supported".to_string(),
        ));
    }
    // An explicit null id is neither a request nor a notification.
    if value.get("id").is_some_and(Value::is_null) {
        return Err(ParseFailure::Invalid("id must not be null".to_string()));
    }
    let req: JsonRpcRequest =
        serde_json::from_value(value).map_err(|e| ParseFailure::Invalid(e.to_string()))?;
    if req.jsonrpc != JSONRPC_VERSION {
        return Err(ParseFailure::Invalid(format!(
            "unsupported jsonrpc version '{}'",
            req.jsonrpc
        )));
    }
    Ok(req)
}

/// HTTP response carrying a JSON-RPC error body.
#[must_use]
pub fn error_response(status: StatusCode, body: JsonRpcResponse) -> Response {
    (status, Json(body)).into_response()
}

/// 405 for verbs an endpoint does not serve, shaped as a JSON-RPC error.
#[must_use]
pub fn method_not_allowed(allow: &'static str) -> Response {
    let mut resp = error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        JsonRpcResponse::error(None, TRANSPORT_ERROR, "Method not allowed."),
    );
    resp.headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    resp
}
