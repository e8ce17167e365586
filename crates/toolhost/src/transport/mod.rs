//! HTTP bindings of the protocol handler.
//!
//! - [`stateless`]: `POST /mcp`, a fresh handler per request.
//! - [`sse`]: `GET /sse` + `POST /messages?sessionId=`, long-lived sessions.

pub mod auth;
pub mod sse;
pub mod stateless;

pub use auth::AuthPolicy;
pub use stateless::{ExchangeState, StatelessExchange};
