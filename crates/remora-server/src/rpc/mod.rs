//! JSON-RPC method dispatch.

pub mod context;
pub mod handlers;
pub mod registry;
