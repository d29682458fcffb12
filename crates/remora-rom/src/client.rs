//! Client-side object manager.
//!
//! Each remote object the client knows about is represented by a
//! reference-counted [`RemoteProxy`]. The manager maps references to proxies
//! weakly: it never keeps a proxy alive, and the last `Arc` dropping removes
//! the map entry and fires the manager's drop hook, if one is installed.
//! Forgetting an object explicitly with
//! [`ClientObjectManager::unregister_object`] suppresses the hook.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use remora_core::{ObjectRef, SubscriptionId};
use tracing::{debug, warn};

use crate::event::RomEvent;

/// Callback invoked for each event delivered to a proxy.
pub type EventListener = Arc<dyn Fn(&RomEvent) + Send + Sync>;

/// Called with the reference of a proxy whose last handle was dropped.
pub type DropHook = Arc<dyn Fn(&ObjectRef) + Send + Sync>;

#[derive(Default)]
struct ProxyMap {
    entries: DashMap<ObjectRef, Weak<RemoteProxy>>,
    on_drop: RwLock<Option<DropHook>>,
}

struct ListenerSlot {
    subscription: SubscriptionId,
    event_type: String,
    listener: EventListener,
}

/// Local handle for one remote object.
pub struct RemoteProxy {
    object: ObjectRef,
    class: String,
    listeners: Mutex<Vec<ListenerSlot>>,
    proxies: Weak<ProxyMap>,
}

impl RemoteProxy {
    /// Reference of the remote object.
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Declared class of the remote object.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Attach a listener for `event_type` under `subscription`.
    pub fn add_listener(
        &self,
        subscription: SubscriptionId,
        event_type: impl Into<String>,
        listener: EventListener,
    ) {
        self.listeners.lock().push(ListenerSlot {
            subscription,
            event_type: event_type.into(),
            listener,
        });
    }

    /// Detach the listener of `subscription`. Returns whether one was found.
    pub fn remove_listener(&self, subscription: &SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|slot| &slot.subscription != subscription);
        listeners.len() != before
    }

    /// Subscriptions currently attached.
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.listeners
            .lock()
            .iter()
            .map(|slot| slot.subscription.clone())
            .collect()
    }

    fn listeners_for(&self, event_type: &str) -> Vec<EventListener> {
        self.listeners
            .lock()
            .iter()
            .filter(|slot| slot.event_type == event_type)
            .map(|slot| slot.listener.clone())
            .collect()
    }
}

impl Drop for RemoteProxy {
    fn drop(&mut self) {
        let Some(proxies) = self.proxies.upgrade() else {
            return;
        };
        // A newer proxy may already occupy the slot.
        let removed = proxies
            .entries
            .remove_if(&self.object, |_, weak| weak.strong_count() == 0);
        if removed.is_none() {
            return;
        }
        let hook = proxies.on_drop.read().clone();
        if let Some(hook) = hook {
            debug!(object = %self.object, "last proxy dropped");
            hook(&self.object);
        }
    }
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("object", &self.object)
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

/// Maps object references to live proxies and routes events to them.
#[derive(Clone, Default)]
pub struct ClientObjectManager {
    proxies: Arc<ProxyMap>,
}

impl ClientObjectManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the callback run when the last handle of a registered proxy
    /// is dropped.
    pub fn on_last_drop(&self, hook: DropHook) {
        *self.proxies.on_drop.write() = Some(hook);
    }

    /// Proxy for `object`, creating one if none is alive.
    pub fn register_object(&self, object: ObjectRef, class: impl Into<String>) -> Arc<RemoteProxy> {
        let make = |object: ObjectRef, class: String| {
            Arc::new(RemoteProxy {
                object,
                class,
                listeners: Mutex::new(Vec::new()),
                proxies: Arc::downgrade(&self.proxies),
            })
        };
        match self.proxies.entries.entry(object.clone()) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = slot.get().upgrade() {
                    return existing;
                }
                let proxy = make(object, class.into());
                let _ = slot.insert(Arc::downgrade(&proxy));
                proxy
            }
            Entry::Vacant(slot) => {
                let proxy = make(object, class.into());
                let _ = slot.insert(Arc::downgrade(&proxy));
                proxy
            }
        }
    }

    /// Live proxy for `object`, if any.
    pub fn get_remote_object(&self, object: &ObjectRef) -> Option<Arc<RemoteProxy>> {
        self.proxies.entries.get(object).and_then(|weak| weak.upgrade())
    }

    /// Forget `object` regardless of outstanding proxies.
    pub fn unregister_object(&self, object: &ObjectRef) {
        let _ = self.proxies.entries.remove(object);
    }

    /// Number of tracked references.
    pub fn len(&self) -> usize {
        self.proxies.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.proxies.entries.is_empty()
    }

    /// Deliver `event` to every listener for its type on the target proxy.
    ///
    /// An event for an object without a live proxy is logged and dropped;
    /// it races with the proxy going away and is expected. Returns the number
    /// of listeners invoked.
    pub fn process_event(&self, event: &RomEvent) -> usize {
        let Some(proxy) = self.get_remote_object(&event.object) else {
            warn!(
                object = %event.object,
                event_type = %event.event_type,
                "event for unknown object dropped"
            );
            return 0;
        };
        let listeners = proxy.listeners_for(&event.event_type);
        debug!(
            object = %event.object,
            event_type = %event.event_type,
            listeners = listeners.len(),
            "dispatching event"
        );
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }
}

impl std::fmt::Debug for ClientObjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientObjectManager")
            .field("tracked", &self.len())
            .finish()
    }
}
