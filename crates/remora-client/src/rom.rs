//! Remote object facade over a [`JsonRpcClient`].
//!
//! Proxies are reference counted. When the last handle to a proxy is
//! dropped without an explicit [`RomClient::release`], its keep-alive is
//! cancelled and a fire-and-forget `release` is sent.

use std::sync::{Arc, Weak};

use remora_core::constants::{
    METHOD_CREATE, METHOD_INVOKE, METHOD_ON_EVENT, METHOD_RELEASE, METHOD_SUBSCRIBE,
    METHOD_UNSUBSCRIBE, PARAM_CONSTRUCTOR_PARAMS, PARAM_OBJECT, PARAM_OPERATION,
    PARAM_OPERATION_PARAMS, PARAM_SUBSCRIPTION, PARAM_TYPE,
};
use remora_core::{ObjectRef, SubscriptionId};
use parking_lot::Mutex;
use remora_rom::{
    ClientObjectManager, EventListener, FlattenError, ObjectResolver, RemoteProxy, RomEvent,
    RomType, RomValue, TypeSchema, flatten, unflatten,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::client::{Inner, JsonRpcClient};
use crate::errors::ClientError;
use crate::keepalive::{KeepAliveMode, KeepAliveScheduler, RpcHeartbeat};

/// Creates, invokes and releases remote objects; routes their events to
/// proxy listeners.
pub struct RomClient {
    rpc: JsonRpcClient,
    objects: ClientObjectManager,
    keepalive: Arc<KeepAliveScheduler>,
    schema: TypeSchema,
}

/// Decoded result of [`RomClient::invoke_typed`].
#[derive(Debug)]
pub struct Invoked {
    /// The result as a native value.
    pub value: RomValue,
    /// A proxy for every object reference inside `value`, in first-seen
    /// order. Dropping them releases objects this client did not hold yet.
    pub proxies: Vec<Arc<RemoteProxy>>,
}

impl Invoked {
    /// Proxy for `object`, if `value` referenced it.
    pub fn proxy(&self, object: &ObjectRef) -> Option<&Arc<RemoteProxy>> {
        self.proxies.iter().find(|p| p.object() == object)
    }
}

/// Registers a proxy for each reference met while decoding a result.
struct ProxyCollector<'a> {
    objects: &'a ClientObjectManager,
    keepalive: &'a KeepAliveScheduler,
    proxies: Mutex<Vec<Arc<RemoteProxy>>>,
}

impl ObjectResolver for ProxyCollector<'_> {
    fn resolve(&self, object: &ObjectRef, expected_class: &str) -> Result<(), FlattenError> {
        let mut proxies = self.proxies.lock();
        if proxies.iter().any(|p| p.object() == object) {
            return Ok(());
        }
        let proxy = self.objects.register_object(object.clone(), expected_class);
        let _ = self.keepalive.add_id(object.as_str());
        proxies.push(proxy);
        Ok(())
    }
}

impl RomClient {
    /// Wrap `rpc` with a per-session keep-alive.
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self::with_keepalive(rpc, KeepAliveMode::PerSession)
    }

    /// Wrap `rpc`; in [`KeepAliveMode::PerId`] every live object is kept
    /// alive individually.
    pub fn with_keepalive(rpc: JsonRpcClient, mode: KeepAliveMode) -> Self {
        let objects = ClientObjectManager::new();
        let router = objects.clone();
        rpc.on_notification(move |request| {
            if request.method != METHOD_ON_EVENT {
                debug!(method = %request.method, "notification ignored");
                return;
            }
            match RomEvent::from_params(request.params.as_ref().unwrap_or(&Value::Null)) {
                Ok(event) => {
                    let _ = router.process_event(&event);
                }
                Err(e) => warn!(error = %e, "malformed onEvent params"),
            }
        });

        let interval = rpc.inner.config.keepalive_interval;
        let heartbeat = Arc::new(RpcHeartbeat::new(rpc.clone(), interval));
        let keepalive = Arc::new(KeepAliveScheduler::new(mode, interval, heartbeat));
        keepalive.start();
        objects.on_last_drop(release_on_drop(
            Arc::downgrade(&rpc.inner),
            Arc::downgrade(&keepalive),
        ));
        Self {
            rpc,
            objects,
            keepalive,
            schema: TypeSchema::new(),
        }
    }

    /// Use `schema` to decode records and enums in typed results.
    #[must_use]
    pub fn with_schema(mut self, schema: TypeSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Underlying JSON-RPC client.
    pub fn rpc(&self) -> &JsonRpcClient {
        &self.rpc
    }

    /// Proxy registry.
    pub fn objects(&self) -> &ClientObjectManager {
        &self.objects
    }

    /// Keep-alive scheduler.
    pub fn keepalive(&self) -> &KeepAliveScheduler {
        &self.keepalive
    }

    /// Instantiate `type_name` remotely.
    pub async fn create(
        &self,
        type_name: &str,
        constructor_params: &RomValue,
    ) -> Result<Arc<RemoteProxy>, ClientError> {
        let result = self
            .rpc
            .request(
                METHOD_CREATE,
                Some(json!({
                    PARAM_TYPE: type_name,
                    PARAM_CONSTRUCTOR_PARAMS: encode(constructor_params)?,
                })),
            )
            .await?;
        let object = result
            .as_str()
            .map(ObjectRef::from)
            .ok_or_else(|| ClientError::Protocol(format!("create returned {result}")))?;
        let _ = self.keepalive.add_id(object.as_str());
        Ok(self.objects.register_object(object, type_name))
    }

    /// Call `operation` on `proxy` and return the flattened result.
    pub async fn invoke(
        &self,
        proxy: &RemoteProxy,
        operation: &str,
        params: &RomValue,
    ) -> Result<Value, ClientError> {
        self.rpc
            .request(
                METHOD_INVOKE,
                Some(json!({
                    PARAM_OBJECT: proxy.object(),
                    PARAM_OPERATION: operation,
                    PARAM_OPERATION_PARAMS: encode(params)?,
                })),
            )
            .await
    }

    /// Call `operation` and decode its result as `returns`.
    ///
    /// Object references in the result come back as live proxies in
    /// [`Invoked::proxies`].
    pub async fn invoke_typed(
        &self,
        proxy: &RemoteProxy,
        operation: &str,
        params: &RomValue,
        returns: &RomType,
    ) -> Result<Invoked, ClientError> {
        let raw = self.invoke(proxy, operation, params).await?;
        let collector = ProxyCollector {
            objects: &self.objects,
            keepalive: &self.keepalive,
            proxies: Mutex::new(Vec::new()),
        };
        let value = unflatten(&raw, returns, &self.schema, &collector).map_err(|e| {
            ClientError::Protocol(format!("{operation} returned {raw}: {e}"))
        })?;
        Ok(Invoked {
            value,
            proxies: collector.proxies.into_inner(),
        })
    }

    /// Subscribe `listener` to `event_type` events of `proxy`.
    pub async fn subscribe(
        &self,
        proxy: &RemoteProxy,
        event_type: &str,
        listener: EventListener,
    ) -> Result<SubscriptionId, ClientError> {
        let result = self
            .rpc
            .request(
                METHOD_SUBSCRIBE,
                Some(json!({ PARAM_OBJECT: proxy.object(), PARAM_TYPE: event_type })),
            )
            .await?;
        let subscription = result
            .as_str()
            .map(SubscriptionId::from)
            .ok_or_else(|| ClientError::Protocol(format!("subscribe returned {result}")))?;
        proxy.add_listener(subscription.clone(), event_type, listener);
        Ok(subscription)
    }

    /// Cancel a subscription and detach its listener.
    pub async fn unsubscribe(
        &self,
        proxy: &RemoteProxy,
        subscription: &SubscriptionId,
    ) -> Result<(), ClientError> {
        let _ = proxy.remove_listener(subscription);
        let _ = self
            .rpc
            .request(
                METHOD_UNSUBSCRIBE,
                Some(json!({ PARAM_OBJECT: proxy.object(), PARAM_SUBSCRIPTION: subscription })),
            )
            .await?;
        Ok(())
    }

    /// Release the remote object behind `proxy`.
    pub async fn release(&self, proxy: &RemoteProxy) -> Result<(), ClientError> {
        let _ = self.keepalive.remove_id(proxy.object().as_str());
        self.objects.unregister_object(proxy.object());
        let _ = self
            .rpc
            .request(METHOD_RELEASE, Some(json!({ PARAM_OBJECT: proxy.object() })))
            .await?;
        Ok(())
    }

    /// Stop keep-alives and close the session.
    pub async fn close(&self) {
        self.keepalive.stop();
        self.rpc.close().await;
    }
}

fn encode(value: &RomValue) -> Result<Value, ClientError> {
    flatten(value).map_err(|e| ClientError::Protocol(e.to_string()))
}

/// Drop hook: stop the keep-alive and release the remote object. Holds
/// only weak handles so the proxy registry does not keep the client alive.
fn release_on_drop(
    rpc: Weak<Inner>,
    keepalive: Weak<KeepAliveScheduler>,
) -> remora_rom::DropHook {
    Arc::new(move |object: &ObjectRef| {
        if let Some(keepalive) = keepalive.upgrade() {
            let _ = keepalive.remove_id(object.as_str());
        }
        let Some(inner) = rpc.upgrade() else {
            return;
        };
        let rpc = JsonRpcClient { inner };
        if rpc.is_closed() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(object = %object, "no runtime, remote release skipped");
            return;
        };
        let object = object.clone();
        drop(runtime.spawn(async move {
            if let Err(e) = rpc
                .request(METHOD_RELEASE, Some(json!({ PARAM_OBJECT: &object })))
                .await
            {
                debug!(object = %object, error = %e, "release of dropped proxy failed");
            }
        }));
    })
}

impl std::fmt::Debug for RomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RomClient")
            .field("rpc", &self.rpc)
            .field("objects", &self.objects)
            .field("keepalive", &self.keepalive)
            .finish()
    }
}
