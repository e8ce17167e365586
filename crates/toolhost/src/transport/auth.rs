use crate::credentials::{CredentialResolver, Credentials};
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse as _, Response},
};
use serde_json::json;

/// Whether requests without credentials are served, and what the 401 challenge advertises.
#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    pub allow_anonymous: bool,
    pub resource_metadata_url: Option<String>,
}

/// Credentials for one inbound request, or the 401 to send instead.
///
/// `fallback` is used when the request itself carries nothing (SSE follow-up posts reuse the
/// credentials captured when the stream opened).
pub(crate) fn authenticate(
    resolver: &CredentialResolver,
    policy: &AuthPolicy,
    headers: &HeaderMap,
    fallback: Option<&Credentials>,
) -> Result<Credentials, Response> {
    match resolver.resolve(headers) {
        Ok(Some(credentials)) => Ok(credentials),
        Ok(None) => match fallback {
            Some(c) => Ok(c.clone()),
            None if policy.allow_anonymous => Ok(Credentials::default()),
            None => Err(unauthorized(policy, "Unauthorized: credentials are required")),
        },
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed credentials");
            Err(unauthorized(policy, &format!("Unauthorized: {e}")))
        }
    }
}

pub(crate) fn unauthorized(policy: &AuthPolicy, message: &str) -> Response {
    let mut challenge = format!(
        "Bearer realm=\"mcp\", error=\"invalid_token\", error_description=\"{}\"",
        header_safe(message)
    );
    if let Some(url) = &policy.resource_metadata_url {
        challenge.push_str(&format!(", resource_metadata=\"{}\"", header_safe(url)));
    }

    let mut resp = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": { "code": "unauthorized", "message": message } })),
    )
        .into_response();
    let value = HeaderValue::from_str(&challenge)
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer realm=\"mcp\""));
    resp.headers_mut().insert(WWW_AUTHENTICATE, value);
    resp
}

fn header_safe(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '"' | '\\' => '\'',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '?',
        })
        .collect()
}
