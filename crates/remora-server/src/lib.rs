//! # remora-server
//!
//! Session-oriented JSON-RPC server over WebSocket and HTTP.
//!
//! - [`session`]: durable sessions that outlive their transport, with poll
//!   buffering and a reconnection window
//! - [`transaction`]: one inbound request, answered at most once, optionally
//!   asynchronously
//! - [`rpc`]: method registry and the built-in object handlers
//! - [`protocol`]: message routing and the protocol methods (`ping`,
//!   `connect`, `poll`, `closeSession`)
//! - [`websocket`] and [`http`]: the two transports
//! - [`server`]: the Axum router, health and metrics endpoints, graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod http;
pub mod metrics;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transaction;
pub mod transport;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{SessionError, TransactionError};
pub use protocol::ProtocolManager;
pub use rpc::registry::{MethodHandler, MethodRegistry};
pub use server::RemoraServer;
pub use session::{Session, SessionManager, SessionOptions};
pub use transaction::Transaction;
pub use transport::Transport;
