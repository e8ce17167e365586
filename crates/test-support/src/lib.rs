//! Helpers shared by the tool host integration tests.

use anyhow::Context as _;
use base64::Engine as _;
use futures::{StreamExt as _, stream::BoxStream};
use serde_json::Value;
use std::net::TcpListener;
use std::process::Child;
use std::time::{Duration, Instant};

/// Kills a spawned server process when the test ends, pass or fail.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Pick an unused TCP port on localhost.
///
/// Note: the port is not reserved; another process may bind it first.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll `<base>/health` until it answers `{"status":"ok"}`.
///
/// # Errors
///
/// Returns an error if the timeout elapses first.
pub async fn wait_healthy(base: &str, timeout: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{base}/health");
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout {
            anyhow::bail!("timed out waiting for {url}");
        }
        if let Ok(resp) = client.get(&url).send().await
            && resp.status().is_success()
            && let Ok(body) = resp.json::<Value>().await
            && body["status"] == "ok"
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Base64 (standard alphabet) of a JSON credential blob, as sent in `x-auth-data`.
#[must_use]
pub fn auth_data_header(blob: &Value) -> String {
    base64::engine::general_purpose::STANDARD.encode(blob.to_string())
}

/// A JSON-RPC request body.
#[must_use]
pub fn rpc(id: i64, method: &str, params: Value) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// `tools/call` request body.
#[must_use]
pub fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
    rpc(id, "tools/call", serde_json::json!({ "name": name, "arguments": arguments }))
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Reads events from an open `text/event-stream` response. Dropping it closes the connection.
pub struct SseEvents {
    inner: BoxStream<'static, Result<sse_stream::Sse, sse_stream::Error>>,
}

impl SseEvents {
    /// # Errors
    ///
    /// Returns an error if the response is not a successful event stream.
    pub fn new(resp: reqwest::Response) -> anyhow::Result<Self> {
        anyhow::ensure!(resp.status().is_success(), "stream open failed: {}", resp.status());
        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        anyhow::ensure!(
            ct.starts_with("text/event-stream"),
            "unexpected content type '{ct}'"
        );
        Ok(Self {
            inner: sse_stream::SseStream::from_byte_stream(resp.bytes_stream()).boxed(),
        })
    }

    /// Next named event, skipping keep-alive comments.
    ///
    /// Returns `Ok(None)` when the stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or a malformed stream.
    pub async fn next_event(&mut self, timeout: Duration) -> anyhow::Result<Option<SseEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let next = tokio::time::timeout(remaining, self.inner.next())
                .await
                .context("timed out waiting for SSE event")?;
            let Some(evt) = next else {
                return Ok(None);
            };
            let evt = evt.context("read SSE event")?;
            let data = evt.data.unwrap_or_default();
            if evt.event.is_none() && data.trim().is_empty() {
                continue;
            }
            return Ok(Some(SseEvent {
                event: evt.event.unwrap_or_else(|| "message".to_string()),
                data,
            }));
        }
    }

    /// Next `message` event decoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, end of stream, or a non-JSON payload.
    pub async fn next_json(&mut self, timeout: Duration) -> anyhow::Result<Value> {
        loop {
            let evt = self
                .next_event(timeout)
                .await?
                .context("event stream ended")?;
            if evt.event != "message" {
                continue;
            }
            return serde_json::from_str(&evt.data).context("parse SSE data as JSON");
        }
    }
}
