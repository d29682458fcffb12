//! Remote object handlers: create, invoke, release, subscribe, unsubscribe.

use async_trait::async_trait;
use remora_core::constants::{
    PARAM_CONSTRUCTOR_PARAMS, PARAM_OBJECT, PARAM_OPERATION, PARAM_OPERATION_PARAMS,
    PARAM_SUBSCRIPTION, PARAM_TYPE,
};
use remora_core::{ObjectRef, RpcError, SubscriptionId};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::rpc::context::RpcContext;
use crate::rpc::handlers::{opt_param, require_string_param};
use crate::rpc::registry::MethodHandler;
use crate::transaction::Transaction;

/// Instantiate a declared type.
pub struct CreateHandler;

#[async_trait]
impl MethodHandler for CreateHandler {
    #[instrument(skip_all, fields(method = "create"))]
    async fn handle(&self, params: Value, tx: &Transaction, ctx: &RpcContext) -> Result<Value, RpcError> {
        let type_name = require_string_param(&params, PARAM_TYPE)?;
        let constructor_params = opt_param(&params, PARAM_CONSTRUCTOR_PARAMS);
        let object = ctx
            .objects
            .create(&type_name, &constructor_params, Some(tx.session().id()))?;
        Ok(Value::String(object.into_inner()))
    }
}

/// Invoke an operation on a live object.
///
/// Object code may block, so it runs on the blocking pool and the
/// transaction completes asynchronously.
pub struct InvokeHandler;

#[async_trait]
impl MethodHandler for InvokeHandler {
    #[instrument(skip_all, fields(method = "invoke"))]
    async fn handle(&self, params: Value, tx: &Transaction, ctx: &RpcContext) -> Result<Value, RpcError> {
        let object = ObjectRef::from(require_string_param(&params, PARAM_OBJECT)?);
        let operation = require_string_param(&params, PARAM_OPERATION)?;
        let operation_params = opt_param(&params, PARAM_OPERATION_PARAMS);

        tx.start_async();
        let worker = tx.clone();
        let objects = ctx.objects.clone();
        let session_id = tx.session().id().clone();
        let _ = tokio::task::spawn_blocking(move || {
            let outcome = match objects.invoke(&object, &operation, &operation_params, Some(&session_id)) {
                Ok(value) => worker.send_response(value),
                Err(e) => worker.send_rpc_error(&e.to_rpc_error()),
            };
            if let Err(e) = outcome {
                warn!(object = %object, operation, error = %e, "invoke result not delivered");
            }
        });
        Ok(Value::Null)
    }
}

/// Release an object and everything it owns.
pub struct ReleaseHandler;

#[async_trait]
impl MethodHandler for ReleaseHandler {
    #[instrument(skip_all, fields(method = "release"))]
    async fn handle(&self, params: Value, _tx: &Transaction, ctx: &RpcContext) -> Result<Value, RpcError> {
        let object = ObjectRef::from(require_string_param(&params, PARAM_OBJECT)?);
        let released = ctx.objects.release(&object)?;
        debug!(object = %object, count = released.len(), "released");
        Ok(Value::Null)
    }
}

/// Subscribe the calling session to an object event.
pub struct SubscribeHandler;

#[async_trait]
impl MethodHandler for SubscribeHandler {
    #[instrument(skip_all, fields(method = "subscribe"))]
    async fn handle(&self, params: Value, tx: &Transaction, ctx: &RpcContext) -> Result<Value, RpcError> {
        let object = ObjectRef::from(require_string_param(&params, PARAM_OBJECT)?);
        let event_type = require_string_param(&params, PARAM_TYPE)?;
        let subscription = ctx
            .objects
            .subscribe(&object, &event_type, Some(tx.session().id()))?;
        Ok(Value::String(subscription.into_inner()))
    }
}

/// Cancel a subscription.
pub struct UnsubscribeHandler;

#[async_trait]
impl MethodHandler for UnsubscribeHandler {
    #[instrument(skip_all, fields(method = "unsubscribe"))]
    async fn handle(&self, params: Value, _tx: &Transaction, ctx: &RpcContext) -> Result<Value, RpcError> {
        let object = ObjectRef::from(require_string_param(&params, PARAM_OBJECT)?);
        let subscription = SubscriptionId::from(require_string_param(&params, PARAM_SUBSCRIPTION)?);
        ctx.objects.unsubscribe(&object, &subscription)?;
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::register_all;
    use crate::rpc::handlers::test_helpers::make_test_context;
    use crate::rpc::registry::MethodRegistry;
    use crate::session::Session;
    use remora_core::errors::{INVALID_PARAMS, NO_SUCH_OBJECT, SERVER_ERROR, UNKNOWN_OPERATION};
    use remora_core::{Request, Response};
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        ctx: RpcContext,
        registry: MethodRegistry,
        session: Arc<Session>,
        next_id: u64,
    }

    impl Harness {
        fn new() -> Self {
            let ctx = make_test_context();
            let mut registry = MethodRegistry::new();
            register_all(&mut registry);
            let session = ctx.sessions.create(None);
            Self {
                ctx,
                registry,
                session,
                next_id: 0,
            }
        }

        async fn call(&mut self, method: &str, params: Value) -> Response {
            self.next_id += 1;
            let request = Request::new(self.next_id, method, Some(params.clone()));
            let (tx, rx) = Transaction::new(&request, self.session.clone(), false);
            self.registry.dispatch(params, &tx, &self.ctx).await;
            drop(tx);
            rx.await.unwrap()
        }

        async fn ok(&mut self, method: &str, params: Value) -> Value {
            let resp = self.call(method, params).await;
            assert!(!resp.is_error(), "{method} failed: {:?}", resp.error);
            remora_core::wire::without_session_id(resp.result.unwrap())
        }

        async fn create(&mut self, type_name: &str, constructor_params: Value) -> String {
            let result = self
                .ok("create", json!({"type": type_name, "constructorParams": constructor_params}))
                .await;
            result["value"].as_str().unwrap().to_owned()
        }
    }

    #[tokio::test]
    async fn create_invoke_release() {
        let mut h = Harness::new();
        let pipeline = h.create("Pipeline", json!({})).await;
        assert!(pipeline.ends_with("_Pipeline"));

        let _ = h
            .ok(
                "invoke",
                json!({"object": pipeline, "operation": "setName", "operationParams": {"name": "main"}}),
            )
            .await;
        let name = h
            .ok("invoke", json!({"object": pipeline, "operation": "getName"}))
            .await;
        assert_eq!(name["value"], "main");

        let _ = h.ok("release", json!({"object": pipeline})).await;
        let resp = h
            .call("invoke", json!({"object": pipeline, "operation": "getName"}))
            .await;
        assert_eq!(resp.error.unwrap().code, NO_SUCH_OBJECT);
    }

    #[tokio::test]
    async fn created_objects_belong_to_session() {
        let mut h = Harness::new();
        let _ = h.create("Pipeline", json!(null)).await;
        assert_eq!(h.ctx.objects.object_count(), 1);
        let released = h.ctx.objects.release_session(h.session.id());
        assert_eq!(released.len(), 1);
    }

    #[tokio::test]
    async fn missing_params_rejected() {
        let mut h = Harness::new();
        let resp = h.call("create", json!({})).await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
        let resp = h.call("invoke", json!({"object": "x"})).await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn application_error_carries_context() {
        let mut h = Harness::new();
        let pipeline = h.create("Pipeline", json!({})).await;
        let err = h
            .call("invoke", json!({"object": pipeline, "operation": "explode"}))
            .await
            .error
            .unwrap();
        assert_eq!(err.code, SERVER_ERROR);
        assert!(err.message.contains("pipeline exploded"));
        assert_eq!(err.data.unwrap()["method"], "explode");
    }

    #[tokio::test]
    async fn unknown_operation_rejected() {
        let mut h = Harness::new();
        let pipeline = h.create("Pipeline", json!({})).await;
        let err = h
            .call("invoke", json!({"object": pipeline, "operation": "fly"}))
            .await
            .error
            .unwrap();
        assert_eq!(err.code, UNKNOWN_OPERATION);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe() {
        let mut h = Harness::new();
        let pipeline = h.create("Pipeline", json!({})).await;
        let endpoint = h.create("Endpoint", json!({"pipeline": pipeline})).await;

        let sub = h.ok("subscribe", json!({"object": endpoint, "type": "Error"})).await;
        let sub = sub["value"].as_str().unwrap().to_owned();
        assert_eq!(h.ctx.objects.subscription_count(), 1);

        let _ = h
            .ok("unsubscribe", json!({"object": endpoint, "subscription": sub}))
            .await;
        assert_eq!(h.ctx.objects.subscription_count(), 0);

        let resp = h
            .call("unsubscribe", json!({"object": endpoint, "subscription": sub}))
            .await;
        assert!(resp.is_error());

        let resp = h
            .call("subscribe", json!({"object": endpoint, "type": "NoSuchEvent"}))
            .await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn release_cascades_to_owned_objects() {
        let mut h = Harness::new();
        let pipeline = h.create("Pipeline", json!({})).await;
        let endpoint = h.create("Endpoint", json!({"pipeline": pipeline})).await;
        let _ = h.ok("release", json!({"object": pipeline})).await;
        assert!(!h.ctx.objects.contains(&ObjectRef::from(endpoint)));
    }
}
