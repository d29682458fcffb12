//! # remora-settings
//!
//! Layered configuration for remora servers and clients.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RemoraSettings::default()`]
//! 2. **User file**: `~/.remora/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `REMORA_*` overrides (highest priority)
//!
//! There is no process-wide singleton: callers load once and pass the
//! relevant section to whatever they construct.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
