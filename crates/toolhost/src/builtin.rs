//! Tools served by the reference binary.

use crate::credentials;
use crate::error::{RegistryError, ToolError};
use crate::registry::{ToolDefinition, ToolRegistry};
use rmcp::model::{CallToolResult, Content, JsonObject};
use serde_json::{Value, json};

/// `echo`: returns `text` unchanged.
///
/// # Errors
///
/// Returns an error only if the built-in schema fails to compile.
pub fn echo() -> Result<ToolDefinition, RegistryError> {
    ToolDefinition::new(
        "echo",
        "Return the given text unchanged.",
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["text"],
            "additionalProperties": false
        }),
        |args: JsonObject| async move {
            let text = args
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok::<_, ToolError>(CallToolResult::success(vec![Content::text(text)]))
        },
    )
}

/// `whoami`: which credential kinds the caller supplied, and its account/tenant ids.
///
/// Secret values are never echoed.
///
/// # Errors
///
/// Returns an error only if the built-in schema fails to compile.
pub fn whoami() -> Result<ToolDefinition, RegistryError> {
    ToolDefinition::new(
        "whoami",
        "Describe the credentials attached to this request (never their values).",
        json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        |_args: JsonObject| async move {
            let Some(creds) = credentials::try_current() else {
                return Err(ToolError::MissingCredentials(
                    "no credential context is bound".to_string(),
                ));
            };
            let summary = json!({
                "access_token": creds.access_token.is_some(),
                "refresh_token": creds.refresh_token.is_some(),
                "client_credentials": creds.client_id.is_some() && creds.client_secret.is_some(),
                "user_token": creds.user_token.is_some(),
                "can_refresh": creds.can_refresh(),
                "account_id": creds.account_id,
                "tenant_id": creds.tenant_id,
            });
            let text = if creds.is_empty() {
                "Anonymous request: no credentials attached.".to_string()
            } else {
                format!(
                    "Credentials attached: {}",
                    serde_json::to_string(&summary).map_err(anyhow::Error::from)?
                )
            };
            let mut result = CallToolResult::success(vec![Content::text(text)]);
            result.structured_content = Some(summary);
            Ok(result)
        },
    )
}

/// Registry with every built-in tool, in listing order.
///
/// # Errors
///
/// Returns an error if a built-in definition fails to register.
pub fn registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(echo()?)?;
    registry.register(whoami()?)?;
    Ok(registry)
}
