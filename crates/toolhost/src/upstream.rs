//! HTTP client for the third-party API a tool wraps.
//!
//! Each [`UpstreamClient`] enforces a minimum spacing between its own consecutive requests
//! (serial throttling; there is no shared budget across instances). The bearer token comes from
//! the active credential scope, so tool bodies never thread credentials by hand.

use crate::credentials;
use crate::error::ToolError;
use reqwest::{Client, Method, StatusCode, header::RETRY_AFTER};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Longest upstream error body quoted back in a diagnostic.
const MAX_ERROR_TEXT: usize = 300;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Minimum time between the start of two consecutive requests.
    pub min_interval: Duration,
    /// Wait used on 429 when the upstream sends no usable `Retry-After`.
    pub rate_limit_backoff: Duration,
    /// Upper bound on any single 429 wait.
    pub max_rate_limit_wait: Duration,
    pub timeout: Option<Duration>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            rate_limit_backoff: Duration::from_secs(1),
            max_rate_limit_wait: Duration::from_secs(30),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug)]
pub struct UpstreamClient {
    client: Client,
    base: Url,
    config: UpstreamConfig,
    last_request: Mutex<Option<Instant>>,
}

impl UpstreamClient {
    /// Relative request paths are resolved against `base`, which is treated as a directory.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Transport`] if the HTTP client cannot be built.
    pub fn new(mut base: Url, config: UpstreamConfig) -> Result<Self, ToolError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(t) = config.timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| ToolError::Transport(sanitize_reqwest_error(&e)))?;
        Ok(Self {
            client,
            base,
            config,
            last_request: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `GET` a JSON resource.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::request_json`].
    pub async fn get_json(&self, path: &str) -> Result<Value, ToolError> {
        self.request_json(Method::GET, path, None).await
    }

    /// `POST` a JSON body and decode the JSON answer.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::request_json`].
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ToolError> {
        self.request_json(Method::POST, path, Some(body)).await
    }

    /// Send one request and decode the response body.
    ///
    /// An empty success body decodes to `null`; a non-JSON success body to a JSON string.
    ///
    /// # Errors
    ///
    /// - [`ToolError::RateLimited`] after a single wait on HTTP 429,
    /// - [`ToolError::Upstream`] for any other non-2xx status,
    /// - [`ToolError::Transport`] when no response was received.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ToolError> {
        let url = self.resolve(path)?;

        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = credentials::try_current()
            .as_deref()
            .and_then(|c| c.access_token().map(str::to_string))
        {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        self.throttle().await;
        let started = std::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Transport(sanitize_reqwest_error(&e)))?;
        let status = response.status();
        tracing::debug!(
            %method,
            path,
            status = status.as_u16(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "upstream request"
        );

        if status == StatusCode::TOO_MANY_REQUESTS {
            let waited = self.rate_limit_wait(response.headers());
            tracing::warn!(
                path,
                waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                "upstream rate limited"
            );
            tokio::time::sleep(waited).await;
            return Err(ToolError::RateLimited { waited });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(sanitize_reqwest_error(&e)))?;

        if !status.is_success() {
            let (code, message) = extract_error(&text, status);
            return Err(ToolError::Upstream {
                status: status.as_u16(),
                code,
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!(text)))
    }

    /// Resolve `path` under the base URL.
    ///
    /// Absolute URLs, scheme-relative paths and `..` segments that leave the base are rejected,
    /// so the scoped bearer token only ever goes to the configured upstream.
    fn resolve(&self, path: &str) -> Result<Url, ToolError> {
        let invalid = |reason: &str| {
            ToolError::InvalidArguments(format!("invalid request path '{path}': {reason}"))
        };
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| invalid(&e.to_string()))?;
        if url.origin() != self.base.origin() || !url.path().starts_with(self.base.path()) {
            return Err(invalid("must stay under the upstream base URL"));
        }
        Ok(url)
    }

    /// Sleep until `min_interval` has passed since the previous request started.
    ///
    /// The lock is held across the sleep so concurrent callers queue up behind each other.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.config.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn rate_limit_wait(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(self.config.rate_limit_backoff, Duration::from_secs)
            .min(self.config.max_rate_limit_wait)
    }
}

/// Pull an error code and message out of the common upstream error body shapes:
/// `{"error": "code"}`, `{"error_summary": "path/not_found/..."}`,
/// `{"error": {"code": ..., "message": ...}}`, `{"code": ..., "message": ...}`.
fn extract_error(text: &str, status: StatusCode) -> (Option<String>, String) {
    let fallback = || {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            status.canonical_reason().unwrap_or("Unknown").to_string()
        } else {
            truncate(trimmed, MAX_ERROR_TEXT)
        }
    };

    let Ok(Value::Object(body)) = serde_json::from_str::<Value>(text) else {
        return (None, fallback());
    };

    let as_code = |v: &Value| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };

    let nested = body.get("error").and_then(Value::as_object);
    let code = body
        .get("error_summary")
        .and_then(as_code)
        .or_else(|| body.get("error").and_then(as_code))
        .or_else(|| nested.and_then(|e| e.get("code")).and_then(as_code))
        .or_else(|| body.get("code").and_then(as_code));

    let message = nested
        .and_then(|e| e.get("message"))
        .or_else(|| body.get("message"))
        .or_else(|| body.get("error_description"))
        .and_then(Value::as_str)
        .map(|m| truncate(m, MAX_ERROR_TEXT))
        .or_else(|| code.clone())
        .unwrap_or_else(fallback);

    (code, message)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// Error text with userinfo and query stripped from any URL it mentions.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}
