//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use remora_core::RpcError;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};
use crate::rpc::context::RpcContext;
use crate::transaction::Transaction;

/// Trait implemented by every RPC method handler.
///
/// The returned value becomes the response unless the handler already
/// answered through `tx` or switched it to async mode.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(
        &self,
        params: Value,
        tx: &Transaction,
        ctx: &RpcContext,
    ) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    handler_timeout: Duration,
}

impl MethodRegistry {
    /// Default upper bound for one handler call.
    pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

    /// Requests slower than this are logged.
    const SLOW_REQUEST: Duration = Duration::from_secs(5);

    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_timeout(Self::DEFAULT_HANDLER_TIMEOUT)
    }

    /// Create an empty registry with a custom handler timeout.
    pub fn with_timeout(handler_timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            handler_timeout,
        }
    }

    /// Register a handler for a method name.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Run the handler for `tx` and answer it unless the handler did.
    pub async fn dispatch(&self, params: Value, tx: &Transaction, ctx: &RpcContext) {
        let method = tx.method().to_owned();
        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "method_not_found")
                .increment(1);
            warn!(method, "unknown RPC method");
            Self::answer_error(tx, &RpcError::MethodNotFound { method });
            return;
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.handler_timeout, handler.handle(params, tx, ctx)).await;

        match result {
            Ok(Ok(value)) => {
                if !tx.is_notification() && !tx.is_async() && !tx.has_responded() {
                    let _ = tx.send_response(value);
                }
            }
            Ok(Err(err)) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => err.error_type())
                    .increment(1);
                debug!(method, error = %err, "handler failed");
                Self::answer_error(tx, &err);
            }
            Err(_elapsed) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.clone(), "error_type" => "timeout")
                    .increment(1);
                error!(method, "RPC handler timed out after {:?}", self.handler_timeout);
                Self::answer_error(
                    tx,
                    &RpcError::internal(format!("handler for '{method}' timed out")),
                );
            }
        }

        let duration = start.elapsed();
        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(duration.as_secs_f64());
        if duration >= Self::SLOW_REQUEST {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }
    }

    fn answer_error(tx: &Transaction, err: &RpcError) {
        if tx.is_notification() {
            warn!(method = tx.method(), error = %err, "notification failed");
        } else if !tx.has_responded() {
            let _ = tx.send_rpc_error(err);
        }
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
