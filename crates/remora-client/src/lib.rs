//! # remora-client
//!
//! WebSocket JSON-RPC client for remora servers.
//!
//! - [`client`]: request/response correlation, session id capture and
//!   injection, notification and server-request dispatch
//! - [`reconnect`]: backoff reconnection with session resumption
//! - [`keepalive`]: per-session or per-object keep-alive timers
//! - [`rom`]: remote object proxies on top of the JSON-RPC client

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod keepalive;
pub mod reconnect;
pub mod rom;

pub use client::JsonRpcClient;
pub use config::ClientConfig;
pub use errors::{ClientError, RemoteError};
pub use keepalive::{Heartbeat, KeepAliveMode, KeepAliveScheduler, RpcHeartbeat};
pub use reconnect::ConnectionEvent;
pub use rom::{Invoked, RomClient};
