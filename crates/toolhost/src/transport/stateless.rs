//! `POST /mcp`: one exchange per HTTP request, nothing retained between requests.

use crate::credentials;
use crate::jsonrpc::{self, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::McpHandler;
use crate::server::AppState;
use axum::{
    Extension, Json,
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse as _, Response},
};
use rmcp::model::ErrorCode;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Connected,
    Closed,
}

#[derive(Debug, Error)]
#[error("exchange already {0:?}; create a new one per request")]
pub struct ExchangeReused(pub ExchangeState);

/// A single-use request/response cycle over a freshly built handler.
#[derive(Debug)]
pub struct StatelessExchange {
    handler: McpHandler,
    state: ExchangeState,
}

impl StatelessExchange {
    #[must_use]
    pub fn new(handler: McpHandler) -> Self {
        Self {
            handler,
            state: ExchangeState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Process exactly one request. The exchange is closed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeReused`] unless the exchange is idle.
    pub async fn process(
        &mut self,
        request: JsonRpcRequest,
    ) -> Result<Option<JsonRpcResponse>, ExchangeReused> {
        if self.state != ExchangeState::Idle {
            return Err(ExchangeReused(self.state));
        }
        self.state = ExchangeState::Connected;
        let response = self.handler.handle(request).await;
        self.state = ExchangeState::Closed;
        Ok(response)
    }
}

pub(crate) async fn post_mcp(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let creds = match super::auth::authenticate(&state.resolver, &state.auth, &headers, None) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let request = match jsonrpc::parse_request(&body) {
        Ok(r) => r,
        Err(failure) => {
            tracing::debug!(?failure, "rejecting malformed request");
            return jsonrpc::error_response(StatusCode::BAD_REQUEST, failure.into_response());
        }
    };

    let started = Instant::now();
    let method = request.method.clone();
    let mut exchange = StatelessExchange::new(state.handler());
    let outcome = credentials::scope(creds, exchange.process(request)).await;
    tracing::debug!(
        %method,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "stateless exchange finished"
    );

    match outcome {
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => jsonrpc::error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonRpcResponse::error(None, ErrorCode::INTERNAL_ERROR, e.to_string()),
        ),
    }
}
