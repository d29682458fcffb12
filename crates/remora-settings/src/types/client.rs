//! Client connection settings.

use remora_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Client connection, timeout and keep-alive settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// WebSocket URL of the server.
    pub url: String,
    /// Per-request response timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Keep-alive heartbeat period in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Maximum time to wait for a reconnection before failing requests.
    pub reconnection_timeout_ms: u64,
    /// Backoff between reconnection attempts.
    pub reconnect: RetryConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8888/ws".to_string(),
            request_timeout_ms: 30_000,
            keepalive_interval_ms: 240_000,
            reconnection_timeout_ms: 10_000,
            reconnect: RetryConfig::default(),
        }
    }
}
