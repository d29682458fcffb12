//! Client configuration.

use std::time::Duration;

use remora_core::retry::RetryConfig;
use remora_settings::ClientSettings;

/// Connection, timeout and reconnection settings for a [`crate::JsonRpcClient`].
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:8888/ws`.
    pub url: String,
    /// How long a request waits for its response.
    pub request_timeout: Duration,
    /// How long a request issued while disconnected waits for a reconnection.
    pub reconnection_timeout: Duration,
    /// Keep-alive period used by [`crate::RomClient`].
    pub keepalive_interval: Duration,
    /// Backoff between reconnection attempts.
    pub reconnect: RetryConfig,
    /// Reconnect automatically when the socket drops.
    pub auto_reconnect: bool,
}

impl ClientConfig {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::from(&ClientSettings::default())
        }
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(s: &ClientSettings) -> Self {
        Self {
            url: s.url.clone(),
            request_timeout: Duration::from_millis(s.request_timeout_ms),
            reconnection_timeout: Duration::from_millis(s.reconnection_timeout_ms),
            keepalive_interval: Duration::from_millis(s.keepalive_interval_ms),
            reconnect: s.reconnect.clone(),
            auto_reconnect: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}
