//! Retry configuration and backoff calculation.
//!
//! Used by the client reconnection loop: each failed attempt waits
//! `min(max_delay, base_delay * 2^attempt)` scaled by a symmetric jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum reconnection attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Jittered delay before retry `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            rand::random::<f64>(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)`; it maps to a multiplier in
/// `[1 - jitter, 1 + jitter)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.base_delay_ms, 200);
        assert_eq!(cfg.max_delay_ms, 5_000);
    }

    #[test]
    fn retry_config_serde_defaults() {
        let cfg: RetryConfig = serde_json::from_str(r#"{"maxRetries": 2}"#).unwrap();
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.base_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    #[test]
    fn backoff_without_jitter_doubles() {
        assert_eq!(calculate_backoff_delay_with_random(0, 100, 10_000, 0.0, 0.3), 100);
        assert_eq!(calculate_backoff_delay_with_random(1, 100, 10_000, 0.0, 0.3), 200);
        assert_eq!(calculate_backoff_delay_with_random(3, 100, 10_000, 0.0, 0.3), 800);
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(calculate_backoff_delay_with_random(20, 100, 1_000, 0.0, 0.9), 1_000);
    }

    #[test]
    fn backoff_high_attempt_no_overflow() {
        let d = calculate_backoff_delay_with_random(u32::MAX, u64::MAX, u64::MAX, 0.0, 0.5);
        assert!(d > 0);
    }

    #[test]
    fn backoff_jitter_bounds() {
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 10_000, 0.2, 0.0), 800);
        assert_eq!(calculate_backoff_delay_with_random(0, 1000, 10_000, 0.2, 0.5), 1000);
    }

    #[test]
    fn delay_for_stays_in_jitter_window() {
        let cfg = RetryConfig::default();
        for _ in 0..50 {
            let d = cfg.delay_for(1).as_millis();
            assert!((320..=480).contains(&d), "{d}");
        }
    }
}
