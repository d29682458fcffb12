//! # remora-core
//!
//! Shared building blocks for the remora JSON-RPC transport and Remote Object
//! Model:
//!
//! - [`ids`]: branded id newtypes (sessions, object references, subscriptions)
//! - [`wire`]: JSON-RPC 2.0 envelopes (request, response, notification)
//! - [`errors`]: numeric error codes and the wire-mapped [`errors::RpcError`]
//! - [`constants`]: protocol method and parameter names
//! - [`logging`]: `tracing` subscriber setup
//! - [`retry`]: backoff math used by reconnection

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod wire;

pub use errors::{RpcError, WireError};
pub use ids::{ConnectionId, ObjectRef, SessionId, SubscriptionId};
pub use wire::{ErrorBody, Message, Request, RequestId, Response};
