//! Server configuration.

use std::time::Duration;

use remora_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the remora server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// WebSocket ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a WebSocket after this long without a pong.
    pub heartbeat_timeout_ms: u64,
    /// How long a session outlives its transport.
    pub reconnection_timeout_ms: u64,
    /// Add `sessionId` to response results and outbound params.
    pub inject_session_id: bool,
    /// Upper bound for one handler call, and for server-to-client requests.
    pub handler_timeout_ms: u64,
    /// Max inbound message size in bytes.
    pub max_message_size: usize,
    /// Max messages buffered for a polling session.
    pub max_buffered_messages: usize,
}

impl ServerConfig {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Session reconnection window.
    pub fn reconnection_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnection_timeout_ms)
    }

    /// Handler time limit.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            reconnection_timeout_ms: 10_000,
            inject_session_id: true,
            handler_timeout_ms: 30_000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            max_buffered_messages: 1024,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval_ms: s.heartbeat_interval_ms,
            heartbeat_timeout_ms: s.heartbeat_timeout_ms,
            reconnection_timeout_ms: s.reconnection_timeout_ms,
            inject_session_id: s.inject_session_id,
            handler_timeout_ms: s.handler_timeout_ms,
            max_message_size: s.max_message_size,
            max_buffered_messages: s.max_buffered_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_ephemeral_loopback() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn durations_follow_millis() {
        let cfg = ServerConfig {
            reconnection_timeout_ms: 1500,
            heartbeat_interval_ms: 250,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.reconnection_timeout(), Duration::from_millis(1500));
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(250));
        assert_eq!(cfg.handler_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn from_settings_copies_every_field() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 9090,
            max_connections: 10,
            inject_session_id: false,
            max_buffered_messages: 7,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.max_connections, 10);
        assert!(!cfg.inject_session_id);
        assert_eq!(cfg.max_buffered_messages, 7);
        assert_eq!(cfg.heartbeat_timeout_ms, settings.heartbeat_timeout_ms);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
