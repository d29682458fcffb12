//! WebSocket transport.

pub mod connection;
pub mod heartbeat;
pub mod session;
