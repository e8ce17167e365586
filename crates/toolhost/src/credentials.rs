//! Per-request credential context.
//!
//! Credentials are bound to the task processing one inbound request with a tokio task-local.
//! Code anywhere in that call tree reads them with [`current`]; concurrently running requests
//! each see only their own binding. There is no process-global mutable credential slot.
//!
//! Note: task-locals do not cross `tokio::spawn`. A handler that spawns work must wrap the
//! spawned future in [`scope`] again (with `current().as_ref().clone()`).

use axum::http::{HeaderMap, HeaderName, header::AUTHORIZATION};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

tokio::task_local! {
    static CURRENT: Arc<Credentials>;
}

/// Run `fut` with `credentials` bound as the current credential context.
pub async fn scope<F>(credentials: Credentials, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(Arc::new(credentials), fut).await
}

/// Credentials bound to the current request.
///
/// # Panics
///
/// Panics when called outside [`scope`]. That is a wiring bug, not a runtime condition.
#[must_use]
pub fn current() -> Arc<Credentials> {
    CURRENT.with(Arc::clone)
}

/// Like [`current`], but returns `None` outside a bound scope.
#[must_use]
pub fn try_current() -> Option<Arc<Credentials>> {
    CURRENT.try_with(Arc::clone).ok()
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("header '{0}' is not valid UTF-8")]
    NonUtf8Header(String),
    #[error("header '{0}' is not valid base64")]
    InvalidBase64(String),
    #[error("header '{header}' does not contain a JSON credential object: {message}")]
    InvalidJson { header: String, message: String },
}

/// Auth material for one request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Second principal for integrations that act as both a bot and a user.
    pub user_token: Option<String>,
    pub account_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            access_token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Decode a base64-encoded JSON credential blob.
    ///
    /// Accepts standard and URL-safe alphabets. Recognized keys: `access_token` (aliases `token`,
    /// `api_key`), `refresh_token`, `client_id`, `client_secret`, `authed_user.access_token`,
    /// `account_id` (alias `user_id`), `tenant_id` (aliases `team_id`, `workspace_id`).
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not base64 or does not decode to a JSON object.
    pub fn from_auth_data(header: &str, encoded: &str) -> Result<Self, CredentialError> {
        let encoded = encoded.trim();
        let bytes = STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))
            .map_err(|_| CredentialError::InvalidBase64(header.to_string()))?;
        let data: AuthData =
            serde_json::from_slice(&bytes).map_err(|e| CredentialError::InvalidJson {
                header: header.to_string(),
                message: e.to_string(),
            })?;
        Ok(data.into())
    }

    /// True when no field carries a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn user_token(&self) -> Option<&str> {
        self.user_token.as_deref()
    }

    /// True when the blob carries enough to refresh the access token.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some()
    }
}

fn redact(v: Option<&String>) -> &'static str {
    if v.is_some() { "<redacted>" } else { "<none>" }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &redact(self.access_token.as_ref()))
            .field("refresh_token", &redact(self.refresh_token.as_ref()))
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(self.client_secret.as_ref()))
            .field("user_token", &redact(self.user_token.as_ref()))
            .field("account_id", &self.account_id)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct AuthData {
    #[serde(default, alias = "token", alias = "api_key")]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    authed_user: Option<AuthedUser>,
    #[serde(default, alias = "user_id")]
    account_id: Option<String>,
    #[serde(default, alias = "team_id", alias = "workspace_id")]
    tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthedUser {
    #[serde(default)]
    access_token: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl From<AuthData> for Credentials {
    fn from(d: AuthData) -> Self {
        Self {
            access_token: non_empty(d.access_token),
            refresh_token: non_empty(d.refresh_token),
            client_id: non_empty(d.client_id),
            client_secret: non_empty(d.client_secret),
            user_token: non_empty(d.authed_user.and_then(|u| u.access_token)),
            account_id: non_empty(d.account_id),
            tenant_id: non_empty(d.tenant_id),
        }
    }
}

/// Extracts credentials for an inbound request.
///
/// Precedence: the process default (when configured) wins over anything the client sends, so a
/// single-tenant deployment can pin credentials without trusting headers. Otherwise the base64
/// JSON header is preferred over the single-token header, which is preferred over
/// `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    default: Option<Credentials>,
    token_header: HeaderName,
    auth_data_header: HeaderName,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(
            HeaderName::from_static("x-auth-token"),
            HeaderName::from_static("x-auth-data"),
        )
    }
}

impl CredentialResolver {
    #[must_use]
    pub fn new(token_header: HeaderName, auth_data_header: HeaderName) -> Self {
        Self {
            default: None,
            token_header,
            auth_data_header,
        }
    }

    #[must_use]
    pub fn with_default(mut self, credentials: Credentials) -> Self {
        self.default = Some(credentials).filter(|c| !c.is_empty());
        self
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Resolve credentials for one request.
    ///
    /// Returns `Ok(None)` when the request carries nothing usable.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential header is present but malformed.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<Option<Credentials>, CredentialError> {
        if let Some(default) = &self.default {
            return Ok(Some(default.clone()));
        }

        if let Some(raw) = header_str(headers, &self.auth_data_header)? {
            let creds = Credentials::from_auth_data(self.auth_data_header.as_str(), raw)?;
            if !creds.is_empty() {
                return Ok(Some(creds));
            }
        }

        if let Some(token) = header_str(headers, &self.token_header)? {
            return Ok(Some(Credentials::bearer(token)));
        }

        let bearer = header_str(headers, &AUTHORIZATION)?
            .and_then(|v| {
                v.strip_prefix("Bearer ")
                    .or_else(|| v.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|t| !t.is_empty());
        Ok(bearer.map(Credentials::bearer))
    }
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &HeaderName,
) -> Result<Option<&'a str>, CredentialError> {
    let Some(v) = headers.get(name) else {
        return Ok(None);
    };
    let v = v
        .to_str()
        .map_err(|_| CredentialError::NonUtf8Header(name.to_string()))?
        .trim();
    Ok(Some(v).filter(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn encode(v: &serde_json::Value) -> String {
        STANDARD.encode(serde_json::to_vec(v).expect("json"))
    }

    #[tokio::test]
    async fn scope_exposes_credentials_to_nested_calls() {
        fn read_token() -> Option<String> {
            current().access_token.clone()
        }

        let got = scope(Credentials::bearer("tok-a"), async { read_token() }).await;
        assert_eq!(got.as_deref(), Some("tok-a"));
    }

    #[tokio::test]
    async fn interleaved_scopes_do_not_leak() {
        async fn observe(token: &'static str) -> Vec<String> {
            scope(Credentials::bearer(token), async {
                let mut seen = Vec::new();
                for _ in 0..20 {
                    tokio::task::yield_now().await;
                    seen.push(current().access_token.clone().unwrap_or_default());
                }
                seen
            })
            .await
        }

        let (a, b) = tokio::join!(observe("A"), observe("B"));
        assert!(a.iter().all(|t| t == "A"));
        assert!(b.iter().all(|t| t == "B"));
    }

    #[test]
    fn try_current_outside_scope_is_none() {
        assert!(try_current().is_none());
    }

    #[test]
    #[should_panic]
    fn current_outside_scope_panics() {
        let _ = current();
    }

    #[test]
    fn auth_data_with_authed_user_and_refresh_fields() {
        let raw = encode(&json!({
            "access_token": "bot",
            "refresh_token": "r",
            "client_id": "cid",
            "client_secret": "cs",
            "authed_user": { "access_token": "user" },
            "team_id": "T1"
        }));
        let c = Credentials::from_auth_data("x-auth-data", &raw).expect("decode");
        assert_eq!(c.access_token(), Some("bot"));
        assert_eq!(c.user_token(), Some("user"));
        assert_eq!(c.tenant_id.as_deref(), Some("T1"));
        assert!(c.can_refresh());
    }

    #[test]
    fn auth_data_rejects_garbage() {
        let err = Credentials::from_auth_data("x-auth-data", "%%%").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidBase64(_)));

        let not_object = STANDARD.encode(b"[1,2]");
        let err = Credentials::from_auth_data("x-auth-data", &not_object).unwrap_err();
        assert!(matches!(err, CredentialError::InvalidJson { .. }));
    }

    #[test]
    fn resolver_prefers_process_default_over_headers() {
        let resolver =
            CredentialResolver::default().with_default(Credentials::bearer("pinned"));
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-token", HeaderValue::from_static("client"));

        let c = resolver.resolve(&headers).expect("resolve").expect("some");
        assert_eq!(c.access_token(), Some("pinned"));
    }

    #[test]
    fn resolver_header_order() {
        let resolver = CredentialResolver::default();

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-authz"));
        let c = resolver.resolve(&headers).expect("resolve").expect("some");
        assert_eq!(c.access_token(), Some("from-authz"));

        headers.insert("x-auth-token", HeaderValue::from_static("from-token"));
        let c = resolver.resolve(&headers).expect("resolve").expect("some");
        assert_eq!(c.access_token(), Some("from-token"));

        let blob = encode(&json!({ "token": "from-blob" }));
        headers.insert(
            "x-auth-data",
            HeaderValue::from_str(&blob).expect("header value"),
        );
        let c = resolver.resolve(&headers).expect("resolve").expect("some");
        assert_eq!(c.access_token(), Some("from-blob"));
    }

    #[test]
    fn resolver_without_anything_is_none() {
        let resolver = CredentialResolver::default();
        assert!(resolver.resolve(&HeaderMap::new()).expect("resolve").is_none());
    }

    #[test]
    fn debug_never_prints_secrets() {
        let c = Credentials {
            client_secret: Some("s3cret".to_string()),
            ..Credentials::bearer("tok")
        };
        let s = format!("{c:?}");
        assert!(!s.contains("s3cret"));
        assert!(!s.contains("tok\""));
    }
}
