//! Generic MCP tool host.
//!
//! A [`registry::ToolRegistry`] built at startup is served over two HTTP transports:
//! stateless `POST /mcp` and the legacy `GET /sse` + `POST /messages` pair. Every request runs
//! inside its own [`credentials`] scope; tool calls are schema-checked by the
//! [`dispatch::Dispatcher`] and all failures come back as tool-result content.

pub mod builtin;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod jsonrpc;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
pub mod upstream;

pub use credentials::{CredentialResolver, Credentials};
pub use dispatch::Dispatcher;
pub use error::{RegistryError, Result, ToolError, ToolhostError};
pub use registry::{ToolDefinition, ToolHandler, ToolRegistry};
pub use server::{AppState, ServerConfig};
