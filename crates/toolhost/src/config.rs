//! Command-line and environment configuration.

use crate::credentials::{CredentialResolver, Credentials};
use crate::error::{Result, ToolhostError};
use crate::protocol::ServerIdentity;
use crate::server::ServerConfig;
use crate::transport::AuthPolicy;
use axum::http::HeaderName;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "mcp-toolhost",
    version,
    about = "MCP tool host with stateless and legacy SSE transports"
)]
pub struct Args {
    #[arg(long, env = "TOOLHOST_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Default filter when `RUST_LOG` is unset.
    #[arg(long, env = "TOOLHOST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "TOOLHOST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Process-wide access token. Overrides anything clients send.
    #[arg(long, env = "TOOLHOST_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Process-wide base64 JSON credential blob. Overrides anything clients send.
    #[arg(
        long,
        env = "TOOLHOST_AUTH_DATA",
        hide_env_values = true,
        conflicts_with = "access_token"
    )]
    pub auth_data: Option<String>,

    #[arg(long, env = "TOOLHOST_TOKEN_HEADER", default_value = "x-auth-token")]
    pub token_header: String,

    #[arg(long, env = "TOOLHOST_AUTH_DATA_HEADER", default_value = "x-auth-data")]
    pub auth_data_header: String,

    /// Serve requests that carry no credentials.
    #[arg(long, env = "TOOLHOST_ALLOW_ANONYMOUS")]
    pub allow_anonymous: bool,

    /// Advertised as `resource_metadata` in 401 challenges.
    #[arg(long, env = "TOOLHOST_RESOURCE_METADATA_URL")]
    pub resource_metadata_url: Option<String>,

    #[arg(long, env = "TOOLHOST_SERVER_NAME", default_value = env!("CARGO_PKG_NAME"))]
    pub server_name: String,

    /// Responses buffered per SSE session before senders wait.
    #[arg(long, env = "TOOLHOST_SSE_CHANNEL_CAPACITY", default_value_t = 64)]
    pub sse_channel_capacity: usize,

    #[arg(long, env = "TOOLHOST_SSE_KEEP_ALIVE_SECS", default_value_t = 15)]
    pub sse_keep_alive_secs: u64,
}

impl Args {
    /// Validate flags and build the server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolhostError::Config`] for invalid header names, a malformed default credential
    /// blob, a zero channel capacity, or an unparseable resource metadata URL.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let token_header = parse_header_name("--token-header", &self.token_header)?;
        let auth_data_header = parse_header_name("--auth-data-header", &self.auth_data_header)?;
        if token_header == auth_data_header {
            return Err(ToolhostError::Config(
                "--token-header and --auth-data-header must differ".to_string(),
            ));
        }

        let mut resolver = CredentialResolver::new(token_header, auth_data_header);
        if let Some(token) = self.access_token.as_deref().map(str::trim) {
            if token.is_empty() {
                return Err(ToolhostError::Config("--access-token is empty".to_string()));
            }
            resolver = resolver.with_default(Credentials::bearer(token));
        }
        if let Some(blob) = &self.auth_data {
            let creds = Credentials::from_auth_data("--auth-data", blob)
                .map_err(|e| ToolhostError::Config(e.to_string()))?;
            if creds.is_empty() {
                return Err(ToolhostError::Config(
                    "--auth-data contains no credentials".to_string(),
                ));
            }
            resolver = resolver.with_default(creds);
        }

        if let Some(u) = &self.resource_metadata_url {
            url::Url::parse(u).map_err(|e| {
                ToolhostError::Config(format!("invalid --resource-metadata-url '{u}': {e}"))
            })?;
        }
        if self.sse_channel_capacity == 0 {
            return Err(ToolhostError::Config(
                "--sse-channel-capacity must be at least 1".to_string(),
            ));
        }
        if self.sse_keep_alive_secs == 0 {
            return Err(ToolhostError::Config(
                "--sse-keep-alive-secs must be at least 1".to_string(),
            ));
        }

        Ok(ServerConfig {
            bind: self.bind,
            identity: ServerIdentity {
                name: self.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            resolver,
            auth: AuthPolicy {
                allow_anonymous: self.allow_anonymous,
                resource_metadata_url: self.resource_metadata_url.clone(),
            },
            sse_channel_capacity: self.sse_channel_capacity,
            sse_keep_alive: Duration::from_secs(self.sse_keep_alive_secs),
        })
    }
}

fn parse_header_name(flag: &str, raw: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(raw.trim().to_ascii_lowercase().as_bytes())
        .map_err(|e| ToolhostError::Config(format!("invalid {flag} '{raw}': {e}")))
}
