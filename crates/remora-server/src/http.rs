//! HTTP request/response transport.
//!
//! Each `POST /jsonrpc` carries one message and gets its response in the
//! HTTP reply. The server cannot push over this transport, so a session
//! reached through it buffers outbound messages until the client sends
//! `poll`. Between requests the session is unbound and its close timer runs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use remora_core::ConnectionId;
use tracing::debug;

use crate::server::AppState;
use crate::transport::Transport;

/// Transport for a single HTTP exchange.
#[derive(Debug)]
pub struct HttpTransport {
    id: ConnectionId,
}

impl HttpTransport {
    /// Fresh exchange with its own connection id.
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn can_push(&self) -> bool {
        false
    }

    fn send(&self, _message: Arc<String>) -> bool {
        false
    }

    fn close(&self) {}
}

/// POST /jsonrpc
pub async fn jsonrpc_handler(State(state): State<AppState>, body: String) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
    let response = state.protocol.process_message(&body, &transport).await;
    state
        .protocol
        .close_session_if_timeout(transport.id(), "no request within the reconnection window");

    match response {
        Some(response) => (
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            remora_core::Message::from(response).to_text(),
        )
            .into_response(),
        None => {
            debug!("notification over http, no content");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchanges_never_push() {
        let a = HttpTransport::new();
        let b = HttpTransport::new();
        assert_ne!(a.id(), b.id());
        assert!(!a.can_push());
        assert!(!a.send(Arc::new("x".into())));
    }
}
