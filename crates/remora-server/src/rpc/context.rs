//! RPC dependency-injection context.

use std::sync::Arc;
use std::time::Instant;

use remora_rom::ObjectRegistry;

use crate::session::SessionManager;

/// Shared context passed to every RPC handler.
pub struct RpcContext {
    /// Live remote objects and their dispatch tables.
    pub objects: ObjectRegistry,
    /// Session lifecycle manager.
    pub sessions: Arc<SessionManager>,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
}

impl RpcContext {
    /// Build a context and route object events into `sessions`.
    pub fn new(objects: ObjectRegistry, sessions: Arc<SessionManager>) -> Self {
        objects.set_event_sink(sessions.clone());
        Self {
            objects,
            sessions,
            server_start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for RpcContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcContext")
            .field("objects", &self.objects.object_count())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
