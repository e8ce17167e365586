//! Session registry for the legacy SSE transport.
//!
//! One entry per open event stream: `session id -> Session`. Entries are inserted once when the
//! stream opens and removed once when it ends. Removal is tied to [`SessionGuard`]'s `Drop`, and
//! the guard is owned by the response stream, so every way a stream can end (client disconnect,
//! server shutdown, handler error) deregisters the session.

use crate::credentials::Credentials;
use crate::jsonrpc::JsonRpcResponse;
use crate::protocol::McpHandler;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
#[error("session '{0}' is closed")]
pub struct SessionClosed(pub String);

/// A live long-lived connection.
#[derive(Debug)]
pub struct Session {
    id: String,
    outbound: mpsc::Sender<JsonRpcResponse>,
    handler: McpHandler,
    credentials: Option<Credentials>,
    created_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The dispatcher-bound handler owned by this session.
    #[must_use]
    pub fn handler(&self) -> &McpHandler {
        &self.handler
    }

    /// Credentials captured when the stream was opened.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Queue a response on the session's event stream.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the stream has already ended.
    pub async fn deliver(&self, response: JsonRpcResponse) -> Result<(), SessionClosed> {
        self.outbound
            .send(response)
            .await
            .map_err(|_| SessionClosed(self.id.clone()))
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new session.
    ///
    /// The returned guard deregisters the session when dropped; the receiver yields responses
    /// queued with [`Session::deliver`].
    #[must_use]
    pub fn open(
        &self,
        handler: McpHandler,
        credentials: Option<Credentials>,
        capacity: usize,
    ) -> (Arc<Session>, SessionGuard, mpsc::Receiver<JsonRpcResponse>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut map = self.inner.write();
        let id = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string();
            if !map.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(Session {
            id: id.clone(),
            outbound: tx,
            handler,
            credentials,
            created_at: Utc::now(),
        });
        map.insert(id.clone(), Arc::clone(&session));
        drop(map);

        tracing::info!(session_id = %id, "session opened");
        let guard = SessionGuard {
            id,
            registry: self.clone(),
        };
        (session, guard, rx)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Remove a session. Safe to call more than once.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.write().remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Deregisters its session on drop.
#[derive(Debug)]
pub struct SessionGuard {
    id: String,
    registry: SessionRegistry,
}

impl SessionGuard {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.registry.remove(&self.id) {
            let age_secs = (Utc::now() - session.created_at()).num_seconds();
            tracing::info!(session_id = %self.id, age_secs, "session closed");
        }
    }
}
