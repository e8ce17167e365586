//! Human-readable diagnostics for tool failures.
//!
//! Upstream failures are mapped by HTTP status and, when the upstream supplies one, by error
//! code to a short remediation hint the calling agent can act on.

use crate::error::ToolError;

fn status_hint(status: u16) -> Option<&'static str> {
    let hint = match status {
        400 => "check the argument values and formats",
        401 => "the credentials are invalid or expired; re-authenticate and retry",
        403 => "the credentials lack permission or scope for this operation",
        404 => "check the path starts with '/' and exists",
        409 => "the target already exists or was modified concurrently; refresh and retry",
        413 => "the payload is too large for a single request; split it up",
        429 => "the upstream API is rate limiting; wait before retrying",
        500..=599 => "the upstream service failed; retry later",
        _ => return None,
    };
    Some(hint)
}

fn code_hint(code: &str) -> Option<&'static str> {
    let code = code.to_ascii_lowercase();
    let hint = if code.contains("not_found") {
        "check the path starts with '/' and exists"
    } else if code.contains("expired_access_token")
        || code.contains("invalid_access_token")
        || code.contains("invalid_auth")
        || code.contains("token_revoked")
    {
        "the access token is no longer valid; re-authenticate and retry"
    } else if code.contains("missing_scope") || code.contains("insufficient_scope") {
        "re-authorize the integration with the missing scope"
    } else if code.contains("insufficient_space") {
        "the destination account is out of space"
    } else if code.contains("rate_limit") || code.contains("ratelimited") {
        "the upstream API is rate limiting; wait before retrying"
    } else {
        return None;
    };
    Some(hint)
}

/// Render a tool failure as a single diagnostic line (plus hint, when one is known).
#[must_use]
pub fn describe(err: &ToolError) -> String {
    match err {
        ToolError::Upstream {
            status,
            code,
            message,
        } => {
            let hint = code
                .as_deref()
                .and_then(code_hint)
                .or_else(|| status_hint(*status));
            let code_part = code
                .as_deref()
                .map(|c| format!(" ({c})"))
                .unwrap_or_default();
            match hint {
                Some(h) => format!("Upstream API error {status}{code_part}: {message}. Hint: {h}."),
                None => format!("Upstream API error {status}{code_part}: {message}"),
            }
        }
        ToolError::RateLimited { waited } => format!(
            "Upstream API rate limit exceeded (waited {}ms). Hint: {}.",
            waited.as_millis(),
            status_hint(429).unwrap_or_default()
        ),
        ToolError::Transport(msg) => {
            format!("Could not reach the upstream API: {msg}. Hint: check connectivity and retry.")
        }
        ToolError::InvalidArguments(msg) => format!("Invalid arguments: {msg}"),
        ToolError::MissingCredentials(msg) => format!(
            "Missing credentials: {msg}. Hint: supply a token via the auth header and retry."
        ),
        ToolError::Other(e) => format!("Tool failed: {e:#}"),
    }
}
