//! HTTP surface: routes, shared state, and the serve loop.

use crate::credentials::CredentialResolver;
use crate::dispatch::Dispatcher;
use crate::error::{Result, ToolhostError};
use crate::protocol::{McpHandler, ServerIdentity};
use crate::registry::ToolRegistry;
use crate::session::SessionRegistry;
use crate::transport::{self, AuthPolicy};
use axum::{
    Extension, Json, Router,
    routing::{get, post},
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Validated server settings (see `config::Args::server_config`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub identity: ServerIdentity,
    pub resolver: CredentialResolver,
    pub auth: AuthPolicy,
    pub sse_channel_capacity: usize,
    pub sse_keep_alive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            identity: ServerIdentity::default(),
            resolver: CredentialResolver::default(),
            auth: AuthPolicy::default(),
            sse_channel_capacity: 64,
            sse_keep_alive: Duration::from_secs(15),
        }
    }
}

/// State shared by every request handler.
///
/// Only `sessions` is mutated after startup.
#[derive(Debug)]
pub struct AppState {
    registry: Arc<ToolRegistry>,
    identity: ServerIdentity,
    pub(crate) resolver: CredentialResolver,
    pub(crate) auth: AuthPolicy,
    sessions: SessionRegistry,
    shutdown: CancellationToken,
    pub(crate) sse_channel_capacity: usize,
    pub(crate) sse_keep_alive: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: &ServerConfig) -> Self {
        Self {
            registry,
            identity: config.identity.clone(),
            resolver: config.resolver.clone(),
            auth: config.auth.clone(),
            sessions: SessionRegistry::new(),
            shutdown: CancellationToken::new(),
            sse_channel_capacity: config.sse_channel_capacity,
            sse_keep_alive: config.sse_keep_alive,
        }
    }

    /// A fresh protocol handler bound to the shared registry.
    #[must_use]
    pub fn handler(&self) -> McpHandler {
        McpHandler::new(
            Dispatcher::new(Arc::clone(&self.registry)),
            self.identity.clone(),
        )
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Cancelled when the server begins shutting down; open event streams end on it.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/mcp",
            post(transport::stateless::post_mcp)
                .fallback(|| async { crate::jsonrpc::method_not_allowed("POST") }),
        )
        .route(
            "/sse",
            get(transport::sse::open_stream)
                .fallback(|| async { crate::jsonrpc::method_not_allowed("GET") }),
        )
        .route(
            "/messages",
            post(transport::sse::post_message)
                .fallback(|| async { crate::jsonrpc::method_not_allowed("POST") }),
        )
        .layer(Extension(state))
}

/// Serve until `shutdown` resolves, then cancel open streams and drain connections.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read or the server fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let token = state.shutdown_token();
    tracing::info!(%addr, tools = state.registry.len(), "listening");

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("shutdown requested");
            token.cancel();
        })
        .await
        .map_err(|e| ToolhostError::Startup(format!("server error: {e}")))?;

    tracing::info!(open_sessions = state.sessions.len(), "server stopped");
    Ok(())
}

/// Bind `config.bind` and serve.
///
/// # Errors
///
/// Returns [`ToolhostError::Startup`] if the address cannot be bound.
pub async fn run<F>(registry: Arc<ToolRegistry>, config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|e| ToolhostError::Startup(format!("bind {}: {e}", config.bind)))?;
    let state = Arc::new(AppState::new(registry, &config));
    serve(listener, state, shutdown).await
}
