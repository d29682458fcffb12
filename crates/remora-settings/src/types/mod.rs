//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file is valid: missing fields keep their default value.

mod client;
mod server;

pub use client::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000, "reconnectionTimeoutMs": 30000 },
///   "client": { "url": "ws://media:9000/ws" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoraSettings {
    /// Server transport and session settings.
    pub server: ServerSettings,
    /// Client connection settings.
    pub client: ClientSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RemoraSettings {
    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutMs must be at least heartbeatIntervalMs".into(),
            ));
        }
        if self.client.keepalive_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "client.keepaliveIntervalMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level or filter directive (`info`, `remora_server=debug`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let s: RemoraSettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, ServerSettings::default().host);
        assert_eq!(s.client, ClientSettings::default());
    }

    #[test]
    fn camel_case_keys() {
        let v = serde_json::to_value(RemoraSettings::default()).unwrap();
        assert!(v["server"].get("reconnectionTimeoutMs").is_some());
        assert!(v["client"].get("requestTimeoutMs").is_some());
    }

    #[test]
    fn validate_rejects_timeout_below_interval() {
        let mut s = RemoraSettings::default();
        s.server.heartbeat_timeout_ms = s.server.heartbeat_interval_ms - 1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_keepalive() {
        let mut s = RemoraSettings::default();
        s.client.keepalive_interval_ms = 0;
        assert!(s.validate().is_err());
    }
}
