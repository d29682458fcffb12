//! Session-scoped handlers.

use async_trait::async_trait;
use remora_core::constants::PARAM_OBJECT;
use remora_core::{ObjectRef, RpcError};
use serde_json::Value;
use tracing::{instrument, trace};

use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodHandler;
use crate::transaction::Transaction;

/// Keep a session (and optionally one object) alive; echoes the payload.
///
/// When the payload names an `object`, a released object answers with
/// "no such object" so per-object keep-alive loops learn it is gone.
pub struct KeepAliveHandler;

#[async_trait]
impl MethodHandler for KeepAliveHandler {
    #[instrument(skip_all, fields(method = "keepAlive"))]
    async fn handle(&self, params: Value, tx: &Transaction, ctx: &RpcContext) -> Result<Value, RpcError> {
        tx.session().touch();
        if let Some(object) = params.get(PARAM_OBJECT).and_then(Value::as_str) {
            let object = ObjectRef::from(object);
            if !ctx.objects.contains(&object) {
                return Err(RpcError::NoSuchObject { object });
            }
        }
        trace!(session_id = %tx.session().id(), "keep-alive");
        Ok(params)
    }
}
