//! Server transport and session settings.

use serde::{Deserialize, Serialize};

/// Server network, liveness and session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks an ephemeral port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// WebSocket ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a WebSocket after this long without a pong.
    pub heartbeat_timeout_ms: u64,
    /// Time a session survives without a bound transport.
    pub reconnection_timeout_ms: u64,
    /// Inject `sessionId` into response results.
    pub inject_session_id: bool,
    /// Upper bound for one synchronous handler call.
    pub handler_timeout_ms: u64,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Maximum server-to-client messages buffered for a polling session.
    pub max_buffered_messages: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            reconnection_timeout_ms: 10_000,
            inject_session_id: true,
            handler_timeout_ms: 30_000,
            max_message_size: 16 * 1024 * 1024,
            max_buffered_messages: 1024,
        }
    }
}
