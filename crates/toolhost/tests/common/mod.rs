#![allow(dead_code)]

use anyhow::Context as _;
use mcp_toolhost::credentials;
use mcp_toolhost::server::{self, AppState, ServerConfig};
use mcp_toolhost::transport::AuthPolicy;
use mcp_toolhost::{ToolDefinition, ToolError, ToolRegistry, builtin};
use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::{Value, json};
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub use mcp_toolhost_test_support::{
    KillOnDrop, SseEvents, auth_data_header, pick_unused_port, rpc, tool_call, wait_healthy,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// In-process server on an ephemeral port. Shuts down on drop.
pub struct TestServer {
    pub base: String,
    pub state: Arc<AppState>,
    pub http: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// POST one JSON-RPC body to `/mcp` with an `x-auth-token` header.
    pub async fn post_mcp(&self, token: &str, body: &Value) -> anyhow::Result<reqwest::Response> {
        self.http
            .post(self.url("/mcp"))
            .header("x-auth-token", token)
            .json(body)
            .send()
            .await
            .context("POST /mcp")
    }

    /// Stop accepting work and cancel open streams.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Built-in tools plus the test-only `token_echo`.
pub fn test_registry() -> anyhow::Result<ToolRegistry> {
    let mut registry = builtin::registry()?;
    registry.register(token_echo()?)?;
    Ok(registry)
}

/// Returns the caller's access token after sleeping `delay_ms`, so concurrent calls interleave.
pub fn token_echo() -> anyhow::Result<ToolDefinition> {
    let def = ToolDefinition::new(
        "token_echo",
        "Echo the caller's access token (test only).",
        json!({
            "type": "object",
            "properties": { "delay_ms": { "type": "integer", "minimum": 0, "maximum": 500 } },
            "required": ["delay_ms"]
        }),
        |args: JsonObject| async move {
            let before = credentials::current().access_token.clone();
            let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            tokio::task::yield_now().await;
            let after = credentials::current().access_token.clone();
            if before != after {
                return Err(ToolError::InvalidArguments("credentials changed mid-call".into()));
            }
            Ok(CallToolResult::success(vec![Content::text(
                after.unwrap_or_default(),
            )]))
        },
    )?;
    Ok(def)
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        auth: AuthPolicy {
            allow_anonymous: false,
            resource_metadata_url: Some(
                "https://toolhost.test/.well-known/oauth-protected-resource".to_string(),
            ),
        },
        sse_keep_alive: Duration::from_millis(200),
        ..ServerConfig::default()
    }
}

pub async fn spawn_server() -> anyhow::Result<TestServer> {
    spawn_server_with(test_registry()?, test_config()).await
}

pub async fn spawn_server_with(
    registry: ToolRegistry,
    config: ServerConfig,
) -> anyhow::Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind")?;
    let addr = listener.local_addr()?;
    let state = Arc::new(AppState::new(Arc::new(registry), &config));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let serve_state = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = server::serve(listener, serve_state, async move {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    let base = format!("http://{addr}");
    wait_healthy(&base, TIMEOUT).await?;
    Ok(TestServer {
        base,
        state,
        http: reqwest::Client::new(),
        shutdown: Some(shutdown_tx),
    })
}

/// First text block of a `tools/call` response.
pub fn result_text(msg: &Value) -> anyhow::Result<String> {
    msg.pointer("/result/content/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("no text content in {msg}"))
}

pub fn spawn_binary(port: u16, extra: &[&str]) -> anyhow::Result<Child> {
    let bin = env!("CARGO_BIN_EXE_mcp-toolhost");
    Command::new(bin)
        .arg("--bind")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--log-level")
        .arg("info")
        .args(extra)
        .spawn()
        .context("spawn mcp-toolhost")
}
