//! `/health` endpoint body.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Live sessions.
    pub active_sessions: usize,
    /// Live remote objects.
    pub live_objects: usize,
    /// Live event subscriptions.
    pub subscriptions: usize,
    /// When this report was produced.
    pub timestamp: DateTime<Utc>,
}

/// Live counters sampled for a health report.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounters {
    /// Open WebSocket connections.
    pub connections: usize,
    /// Live sessions.
    pub sessions: usize,
    /// Live remote objects.
    pub objects: usize,
    /// Live event subscriptions.
    pub subscriptions: usize,
}

/// Build a health response.
pub fn health_check(start_time: Instant, counters: HealthCounters, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counters.connections,
        active_sessions: counters.sessions,
        live_objects: counters.objects,
        subscriptions: counters.subscriptions,
        timestamp: Utc::now(),
    }
}
