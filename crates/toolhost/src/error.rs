//! Error types for the tool host.

use std::time::Duration;
use thiserror::Error;

/// Main error type for startup, configuration and serving.
#[derive(Error, Debug)]
pub enum ToolhostError {
    /// Configuration errors (invalid flags, malformed default credentials)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Startup errors (bind failed)
    #[error("Startup error: {0}")]
    Startup(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for tool host operations.
pub type Result<T> = std::result::Result<T, ToolhostError>;

/// Errors raised while building the tool registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("duplicate tool name '{0}'")]
    DuplicateTool(String),

    #[error("invalid input schema for tool '{tool}': {message}")]
    InvalidSchema { tool: String, message: String },
}

/// Failure returned by a tool handler.
///
/// None of these abort the protocol exchange: the dispatcher renders every variant into
/// tool-result content (see [`crate::diagnostics`]).
#[derive(Error, Debug)]
pub enum ToolError {
    /// The wrapped API answered with a non-success status.
    #[error("upstream API returned HTTP {status}: {message}")]
    Upstream {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The wrapped API answered 429; the client already waited once.
    #[error("upstream API rate limit exceeded")]
    RateLimited { waited: Duration },

    /// The request never produced an HTTP response.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// Arguments passed schema validation but are semantically unusable.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The active credential context lacks what the tool needs.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    #[must_use]
    pub fn upstream(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            code,
            message: message.into(),
        }
    }
}
