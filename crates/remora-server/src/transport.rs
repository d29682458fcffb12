//! Transport contract shared by the WebSocket and HTTP front ends.

use std::sync::Arc;

use remora_core::ConnectionId;

/// One physical connection a session can be bound to.
///
/// A push transport delivers server-initiated messages immediately. A
/// non-push transport (HTTP request/response) cannot, so the session buffers
/// them until the client polls.
pub trait Transport: Send + Sync {
    /// Connection identifier.
    fn id(&self) -> &ConnectionId;

    /// Whether server-initiated messages can be delivered right away.
    fn can_push(&self) -> bool;

    /// Queue a serialized message. Returns `false` if it was not accepted.
    fn send(&self, message: Arc<String>) -> bool;

    /// Close the underlying connection.
    fn close(&self);
}
