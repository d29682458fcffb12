//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RemoraSettings::default()`]
//! 2. If `~/.remora/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `REMORA_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RemoraSettings;

/// Bind address override.
pub const ENV_HOST: &str = "REMORA_HOST";
/// Listen port override.
pub const ENV_PORT: &str = "REMORA_PORT";
/// Session reconnection timeout override (ms).
pub const ENV_RECONNECTION_TIMEOUT_MS: &str = "REMORA_RECONNECTION_TIMEOUT_MS";
/// WebSocket ping interval override (ms).
pub const ENV_HEARTBEAT_INTERVAL_MS: &str = "REMORA_HEARTBEAT_INTERVAL_MS";
/// Session id injection toggle.
pub const ENV_INJECT_SESSION_ID: &str = "REMORA_INJECT_SESSION_ID";
/// Client request timeout override (ms).
pub const ENV_REQUEST_TIMEOUT_MS: &str = "REMORA_REQUEST_TIMEOUT_MS";
/// Client keep-alive interval override (ms).
pub const ENV_KEEPALIVE_INTERVAL_MS: &str = "REMORA_KEEPALIVE_INTERVAL_MS";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "REMORA_LOG_LEVEL";

/// Resolve the path to the settings file (`~/.remora/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".remora").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RemoraSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RemoraSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<RemoraSettings> {
    let defaults = serde_json::to_value(RemoraSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut RemoraSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_overrides(settings: &mut RemoraSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup: &lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string(ENV_HOST) {
        settings.server.host = v;
    }
    if let Some(v) = env.u16(ENV_PORT, 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64(ENV_RECONNECTION_TIMEOUT_MS, 0, 86_400_000) {
        settings.server.reconnection_timeout_ms = v;
    }
    if let Some(v) = env.u64(ENV_HEARTBEAT_INTERVAL_MS, 100, 600_000) {
        settings.server.heartbeat_interval_ms = v;
        settings.server.heartbeat_timeout_ms = settings.server.heartbeat_timeout_ms.max(v);
    }
    if let Some(v) = env.bool(ENV_INJECT_SESSION_ID) {
        settings.server.inject_session_id = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.u64(ENV_REQUEST_TIMEOUT_MS, 1, 3_600_000) {
        settings.client.request_timeout_ms = v;
    }
    if let Some(v) = env.u64(ENV_KEEPALIVE_INTERVAL_MS, 1, 3_600_000) {
        settings.client.keepalive_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string(ENV_LOG_LEVEL) {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Readers ─────────────────────────────────────────────────────────────────

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
