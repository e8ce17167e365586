//! Legacy two-endpoint transport.
//!
//! `GET /sse` opens an event stream and registers a session; the first event (`endpoint`)
//! tells the client where to post: `/messages?sessionId=<id>`. Each posted request is answered
//! with `202 Accepted` and its response is delivered later as an `event: message` on the stream.

use crate::credentials;
use crate::jsonrpc::{self, JsonRpcResponse, TRANSPORT_ERROR};
use crate::server::AppState;
use crate::session::SessionGuard;
use axum::{
    Extension,
    body::Bytes,
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse as _, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{StreamExt as _, stream};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const MESSAGES_PATH: &str = "/messages";

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

pub(crate) async fn open_stream(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let creds = match super::auth::authenticate(&state.resolver, &state.auth, &headers, None) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let (session, guard, rx) =
        state
            .sessions()
            .open(state.handler(), Some(creds), state.sse_channel_capacity);
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?sessionId={}", session.id()));
    drop(session);

    let events = stream::once(async move { Ok::<_, axum::Error>(endpoint) })
        .chain(outbound_events(rx, guard))
        .take_until(state.shutdown_token().cancelled_owned());

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.sse_keep_alive))
        .into_response()
}

/// Responses queued for the session, as SSE events.
///
/// The guard travels inside the stream state, so the session is deregistered whenever the
/// response body is dropped.
fn outbound_events(
    rx: mpsc::Receiver<JsonRpcResponse>,
    guard: SessionGuard,
) -> impl futures::Stream<Item = Result<Event, axum::Error>> + Send + 'static {
    stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let response = rx.recv().await?;
        let event = Event::default().event("message").json_data(&response);
        if let Err(e) = &event {
            tracing::warn!(session_id = %guard.id(), error = %e, "failed to encode response");
        }
        Some((event, (rx, guard)))
    })
}

pub(crate) async fn post_message(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|s| !s.is_empty()) else {
        return jsonrpc::error_response(
            StatusCode::BAD_REQUEST,
            JsonRpcResponse::error(None, TRANSPORT_ERROR, "Missing sessionId query parameter."),
        );
    };
    let Some(session) = state.sessions().get(&session_id) else {
        tracing::debug!(%session_id, "message for unknown session");
        return jsonrpc::error_response(
            StatusCode::NOT_FOUND,
            JsonRpcResponse::error(None, TRANSPORT_ERROR, "Session not found."),
        );
    };

    let creds = match super::auth::authenticate(
        &state.resolver,
        &state.auth,
        &headers,
        session.credentials(),
    ) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let request = match jsonrpc::parse_request(&body) {
        Ok(r) => r,
        Err(failure) => {
            return jsonrpc::error_response(StatusCode::BAD_REQUEST, failure.into_response());
        }
    };

    tokio::spawn(credentials::scope(creds, async move {
        let method = request.method.clone();
        let Some(response) = session.handler().handle(request).await else {
            return;
        };
        if let Err(e) = session.deliver(response).await {
            tracing::debug!(session_id = %session.id(), %method, error = %e, "response dropped");
        }
    }));

    StatusCode::ACCEPTED.into_response()
}
