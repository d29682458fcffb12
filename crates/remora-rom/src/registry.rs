//! Server-side object registry.
//!
//! Holds every live object strongly, keyed by a freshly minted
//! [`ObjectRef`], together with its class, its owner (for release cascades)
//! and the session that created it. Dispatch never holds a map guard while
//! running object code, so implementations may call back into the registry
//! (create children, emit events) freely.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use remora_core::{ObjectRef, SessionId, SubscriptionId};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::class::{BindFailure, ClassRegistry, DynObject, bind_args};
use crate::errors::{DispatchError, FlattenError, RomError};
use crate::event::RomEvent;
use crate::flatten::{ObjectResolver, flatten};
use crate::value::RomValue;

/// Receives events emitted by objects, one call per matching subscription.
pub trait EventSink: Send + Sync {
    /// Deliver `event` to the session that subscribed.
    fn deliver(&self, session: Option<&SessionId>, event: RomEvent);
}

#[derive(Clone)]
struct Entry {
    class: String,
    object: Arc<DynObject>,
    owner: Option<ObjectRef>,
    session: Option<SessionId>,
}

#[derive(Clone, Debug)]
struct Subscription {
    object: ObjectRef,
    event_type: String,
    session: Option<SessionId>,
}

struct Inner {
    classes: ClassRegistry,
    objects: DashMap<ObjectRef, Entry>,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

/// Live object set plus the class dispatch tables.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ObjectRegistry {
    inner: Arc<Inner>,
}

impl ObjectRegistry {
    /// Create an empty registry over the declared classes.
    pub fn new(classes: ClassRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                classes,
                objects: DashMap::new(),
                subscriptions: DashMap::new(),
                sink: RwLock::new(None),
            }),
        }
    }

    /// Route emitted events to `sink`.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    /// Declared classes.
    pub fn classes(&self) -> &ClassRegistry {
        &self.inner.classes
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.inner.objects.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Whether `object` is live.
    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.inner.objects.contains_key(object)
    }

    /// Class of a live object.
    pub fn class_of(&self, object: &ObjectRef) -> Option<String> {
        self.inner.objects.get(object).map(|e| e.class.clone())
    }

    /// Native instance of a live object, if it is exactly a `T`.
    pub fn get<T: Send + Sync + 'static>(&self, object: &ObjectRef) -> Result<Arc<T>, RomError> {
        let instance = self.entry(object)?.object;
        instance.downcast::<T>().map_err(|_| RomError::Internal {
            message: format!("object {object} does not have the requested native type"),
        })
    }

    fn entry(&self, object: &ObjectRef) -> Result<Entry, RomError> {
        self.inner
            .objects
            .get(object)
            .map(|e| e.value().clone())
            .ok_or_else(|| RomError::NoSuchObject {
                object: object.clone(),
            })
    }

    // ── create ──────────────────────────────────────────────────────

    /// Instantiate `type_name` from flattened constructor params.
    pub fn create(
        &self,
        type_name: &str,
        params: &Value,
        session: Option<&SessionId>,
    ) -> Result<ObjectRef, DispatchError> {
        let fail = |source: RomError| DispatchError {
            action: format!("create {type_name}"),
            type_name: Some(type_name.to_owned()),
            operation: None,
            object: None,
            params: params.clone(),
            source,
        };

        let classes = &self.inner.classes;
        let def = classes.class(type_name).ok_or_else(|| {
            fail(RomError::UnknownType {
                type_name: type_name.to_owned(),
            })
        })?;
        let ctor = def.constructor().ok_or_else(|| {
            fail(RomError::NotInstantiable {
                type_name: type_name.to_owned(),
            })
        })?;

        let args = bind_args(&ctor.params, params, classes.schema(), &Resolver(self))
            .map_err(|failure| fail(failure.into_error(type_name, "constructor")))?;
        let owner = match def.owner_param() {
            Some(param) => Some(args.object(param).map_err(fail)?.clone()),
            None => None,
        };

        let object_ref = ObjectRef::for_class(type_name);
        let ctx = InvokeContext {
            registry: self.clone(),
            session: session.cloned(),
            this: Some(object_ref.clone()),
        };
        let instance = ctor.call(&args, &ctx).map_err(fail)?;

        let _ = self.inner.objects.insert(
            object_ref.clone(),
            Entry {
                class: type_name.to_owned(),
                object: instance,
                owner: owner.clone(),
                session: session.cloned(),
            },
        );

        // The owner may have been released while the constructor ran.
        if let Some(owner) = owner {
            if !self.contains(&owner) {
                let _ = self.remove_tree(&object_ref);
                return Err(fail(RomError::NoSuchObject { object: owner }));
            }
        }

        debug!(object = %object_ref, class = type_name, "object created");
        Ok(object_ref)
    }

    // ── invoke ──────────────────────────────────────────────────────

    /// Call `operation` on `object` with flattened params; returns the
    /// flattened result.
    ///
    /// Candidates are the class's operations of that name in declaration
    /// order, then its ancestors'. The first whose signature binds wins.
    pub fn invoke(
        &self,
        object: &ObjectRef,
        operation: &str,
        params: &Value,
        session: Option<&SessionId>,
    ) -> Result<Value, DispatchError> {
        let class_hint = object.class_hint().map(str::to_owned);
        let fail = |class: Option<String>, source: RomError| DispatchError {
            action: format!(
                "invoke {}.{operation}",
                class.as_deref().unwrap_or("<unknown>")
            ),
            type_name: class,
            operation: Some(operation.to_owned()),
            object: Some(object.clone()),
            params: params.clone(),
            source,
        };

        let entry = self
            .entry(object)
            .map_err(|e| fail(class_hint.clone(), e))?;
        let class = Some(entry.class.clone());
        let classes = &self.inner.classes;
        let resolver = Resolver(self);
        let ctx = InvokeContext {
            registry: self.clone(),
            session: session.cloned(),
            this: Some(object.clone()),
        };

        let mut view: &DynObject = entry.object.as_ref();
        let mut first_value_error: Option<FlattenError> = None;
        for def in classes.lineage(&entry.class) {
            for op in def.operations_named(operation) {
                match bind_args(&op.params, params, classes.schema(), &resolver) {
                    Ok(args) => {
                        let result = op
                            .call(view, &args, &ctx)
                            .map_err(|e| fail(class.clone(), e))?;
                        return flatten(&result).map_err(|e| {
                            fail(class.clone(), RomError::Internal {
                                message: format!("{operation} returned an unencodable value: {e}"),
                            })
                        });
                    }
                    Err(BindFailure::Value(e)) => {
                        let _ = first_value_error.get_or_insert(e);
                    }
                    Err(BindFailure::Structure(_)) => {}
                }
            }
            if def.parent().is_some() {
                let upcast = def.upcast().ok_or_else(|| {
                    fail(class.clone(), RomError::Internal {
                        message: format!("class {} has no parent view", def.name()),
                    })
                })?;
                view = upcast(view).ok_or_else(|| {
                    fail(class.clone(), RomError::Internal {
                        message: format!("instance is not a native {}", def.name()),
                    })
                })?;
            }
        }

        let source = match first_value_error {
            Some(e) => RomError::Flatten(e),
            None => RomError::UnknownOperation {
                class: entry.class.clone(),
                operation: operation.to_owned(),
            },
        };
        Err(fail(class, source))
    }

    // ── release ─────────────────────────────────────────────────────

    /// Remove `object`, every object it owns (transitively) and their
    /// subscriptions. Returns the released references.
    pub fn release(&self, object: &ObjectRef) -> Result<Vec<ObjectRef>, DispatchError> {
        let released = self.remove_tree(object).map_err(|source| DispatchError {
            action: format!("release {object}"),
            type_name: object.class_hint().map(str::to_owned),
            operation: None,
            object: Some(object.clone()),
            params: Value::Null,
            source,
        })?;
        debug!(object = %object, cascaded = released.len() - 1, "object released");
        Ok(released)
    }

    fn remove_tree(&self, root: &ObjectRef) -> Result<Vec<ObjectRef>, RomError> {
        let Some((_, root_entry)) = self.inner.objects.remove(root) else {
            return Err(RomError::NoSuchObject {
                object: root.clone(),
            });
        };
        let mut dropped = vec![root_entry];
        let mut released = vec![root.clone()];
        let mut frontier = vec![root.clone()];
        while let Some(parent) = frontier.pop() {
            let children: Vec<ObjectRef> = self
                .inner
                .objects
                .iter()
                .filter(|e| e.owner.as_ref() == Some(&parent))
                .map(|e| e.key().clone())
                .collect();
            for child in children {
                if let Some((_, entry)) = self.inner.objects.remove(&child) {
                    dropped.push(entry);
                    released.push(child.clone());
                    frontier.push(child);
                }
            }
        }
        self.inner
            .subscriptions
            .retain(|_, sub| !released.contains(&sub.object));
        // Instances drop here, outside any map guard.
        drop(dropped);
        Ok(released)
    }

    /// Release every object created by `session` and drop its subscriptions.
    pub fn release_session(&self, session: &SessionId) -> Vec<ObjectRef> {
        self.inner
            .subscriptions
            .retain(|_, sub| sub.session.as_ref() != Some(session));
        let roots: Vec<ObjectRef> = self
            .inner
            .objects
            .iter()
            .filter(|e| e.session.as_ref() == Some(session))
            .map(|e| e.key().clone())
            .collect();
        let mut released = Vec::new();
        for root in roots {
            // Already gone if an earlier root owned it.
            if let Ok(mut refs) = self.remove_tree(&root) {
                released.append(&mut refs);
            }
        }
        if !released.is_empty() {
            info!(session_id = %session, count = released.len(), "released session objects");
        }
        released
    }

    /// Release everything. Returns the number of objects dropped.
    pub fn release_all(&self) -> usize {
        self.inner.subscriptions.clear();
        let refs: Vec<ObjectRef> = self.inner.objects.iter().map(|e| e.key().clone()).collect();
        let mut dropped = Vec::with_capacity(refs.len());
        for r in refs {
            if let Some((_, entry)) = self.inner.objects.remove(&r) {
                dropped.push(entry);
            }
        }
        dropped.len()
    }

    // ── events ──────────────────────────────────────────────────────

    /// Subscribe `session` to `event_type` on `object`.
    pub fn subscribe(
        &self,
        object: &ObjectRef,
        event_type: &str,
        session: Option<&SessionId>,
    ) -> Result<SubscriptionId, DispatchError> {
        let fail = |source: RomError| DispatchError {
            action: format!("subscribe {event_type}"),
            type_name: object.class_hint().map(str::to_owned),
            operation: None,
            object: Some(object.clone()),
            params: Value::Null,
            source,
        };
        let entry = self.entry(object).map_err(fail)?;
        if !self.inner.classes.declares_event(&entry.class, event_type) {
            return Err(fail(RomError::UnknownEvent {
                class: entry.class,
                event_type: event_type.to_owned(),
            }));
        }
        let id = SubscriptionId::new();
        let _ = self.inner.subscriptions.insert(
            id.clone(),
            Subscription {
                object: object.clone(),
                event_type: event_type.to_owned(),
                session: session.cloned(),
            },
        );
        if !self.contains(object) {
            let _ = self.inner.subscriptions.remove(&id);
            return Err(fail(RomError::NoSuchObject {
                object: object.clone(),
            }));
        }
        debug!(object = %object, event_type, subscription = %id, "subscribed");
        Ok(id)
    }

    /// Cancel a subscription on `object`.
    pub fn unsubscribe(
        &self,
        object: &ObjectRef,
        subscription: &SubscriptionId,
    ) -> Result<(), DispatchError> {
        match self
            .inner
            .subscriptions
            .remove_if(subscription, |_, sub| &sub.object == object)
        {
            Some(_) => Ok(()),
            None => Err(DispatchError {
                action: format!("unsubscribe {subscription}"),
                type_name: object.class_hint().map(str::to_owned),
                operation: None,
                object: Some(object.clone()),
                params: Value::Null,
                source: RomError::NoSuchSubscription {
                    subscription: subscription.clone(),
                },
            }),
        }
    }

    /// Emit an event from `object` to every matching subscription.
    /// Returns the number of deliveries.
    pub fn emit(&self, object: &ObjectRef, event_type: &str, data: &RomValue) -> usize {
        emit_on(&self.inner, object, event_type, data)
    }
}

fn emit_on(inner: &Inner, object: &ObjectRef, event_type: &str, data: &RomValue) -> usize {
    let targets: Vec<(SubscriptionId, Option<SessionId>)> = inner
        .subscriptions
        .iter()
        .filter(|s| &s.object == object && s.event_type == event_type)
        .map(|s| (s.key().clone(), s.session.clone()))
        .collect();
    if targets.is_empty() {
        debug!(object = %object, event_type, "event has no subscribers");
        return 0;
    }
    let Some(sink) = inner.sink.read().clone() else {
        warn!(object = %object, event_type, "no event sink installed, dropping event");
        return 0;
    };
    let payload = match flatten(data) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(object = %object, event_type, error = %e, "event data not encodable, dropping event");
            return 0;
        }
    };
    for (subscription, session) in &targets {
        sink.deliver(
            session.as_ref(),
            RomEvent {
                object: object.clone(),
                subscription: subscription.clone(),
                event_type: event_type.to_owned(),
                data: payload.clone(),
            },
        );
    }
    targets.len()
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("objects", &self.object_count())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

impl BindFailure {
    fn into_error(self, type_name: &str, what: &str) -> RomError {
        match self {
            Self::Structure(reason) => {
                RomError::invalid_params(format!("{what} of {type_name}: {reason}"))
            }
            Self::Value(e) => RomError::Flatten(e),
        }
    }
}

struct Resolver<'a>(&'a ObjectRegistry);

impl ObjectResolver for Resolver<'_> {
    fn resolve(&self, object: &ObjectRef, expected_class: &str) -> Result<(), FlattenError> {
        let class = self.0.class_of(object).ok_or_else(|| FlattenError::NoSuchObject {
            object: object.clone(),
        })?;
        if self
            .0
            .inner
            .classes
            .schema()
            .is_assignable(&class, expected_class)
        {
            Ok(())
        } else {
            Err(FlattenError::ClassMismatch {
                object: object.clone(),
                expected: expected_class.to_owned(),
                actual: class,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invocation context
// ─────────────────────────────────────────────────────────────────────────────

/// What an object implementation can see while it runs.
#[derive(Clone)]
pub struct InvokeContext {
    registry: ObjectRegistry,
    session: Option<SessionId>,
    this: Option<ObjectRef>,
}

impl InvokeContext {
    /// The registry the call runs in.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Session that issued the call.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Reference of the object being constructed or invoked.
    pub fn this(&self) -> Option<&ObjectRef> {
        self.this.as_ref()
    }

    /// Native instance of another live object.
    pub fn object<T: Send + Sync + 'static>(&self, object: &ObjectRef) -> Result<Arc<T>, RomError> {
        self.registry.get(object)
    }

    /// Emit an event from the current object.
    pub fn emit(&self, event_type: &str, data: &RomValue) -> usize {
        self.this
            .as_ref()
            .map_or(0, |this| self.registry.emit(this, event_type, data))
    }

    /// Detached handle for emitting from the current object later.
    pub fn emitter(&self) -> Option<EventEmitter> {
        Some(EventEmitter {
            registry: Arc::downgrade(&self.registry.inner),
            object: self.this.clone()?,
        })
    }
}

/// Emits events for one object without keeping the registry alive.
#[derive(Clone)]
pub struct EventEmitter {
    registry: Weak<Inner>,
    object: ObjectRef,
}

impl EventEmitter {
    /// The emitting object.
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Emit `event_type`; returns the number of deliveries (0 once the
    /// registry is gone or the object released).
    pub fn emit(&self, event_type: &str, data: &RomValue) -> usize {
        self.registry
            .upgrade()
            .map_or(0, |inner| emit_on(&inner, &self.object, event_type, data))
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassBuilder, ParamSpec};
    use crate::types::{FieldSpec, RomType, TypeSchema};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Pipeline {
        name: Mutex<String>,
    }

    #[derive(Debug)]
    struct Endpoint {
        pipeline: ObjectRef,
        uri: String,
    }

    struct Player {
        endpoint: Endpoint,
        emitter: Option<EventEmitter>,
    }

    impl AsRef<Endpoint> for Player {
        fn as_ref(&self) -> &Endpoint {
            &self.endpoint
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Option<SessionId>, RomEvent)>>);

    impl EventSink for Recorder {
        fn deliver(&self, session: Option<&SessionId>, event: RomEvent) {
            self.0.lock().push((session.cloned(), event));
        }
    }

    fn classes() -> ClassRegistry {
        let schema = TypeSchema::new()
            .with_enum("State", ["IDLE", "PLAYING"])
            .with_record("Size", vec![FieldSpec::required("width", RomType::Int)]);
        ClassRegistry::builder()
            .schema(schema)
            .class(
                ClassBuilder::<Pipeline>::new("Pipeline")
                    .constructor(vec![], |_, _| Ok(Pipeline::default()))
                    .operation("getName", vec![], RomType::String, |p, _, _| {
                        Ok(p.name.lock().clone().into())
                    })
                    .operation(
                        "setName",
                        vec![ParamSpec::required("name", RomType::String)],
                        RomType::Void,
                        |p, args, _| {
                            *p.name.lock() = args.str("name")?.to_owned();
                            Ok(RomValue::Null)
                        },
                    )
                    .operation("fail", vec![], RomType::Void, |_, _, _| {
                        Err(RomError::application("pipeline is broken"))
                    })
                    .operation("ratio", vec![], RomType::Float, |_, _, _| {
                        Ok(RomValue::Float(f64::NAN))
                    })
                    .event("Error")
                    .build(),
            )
            .class(
                ClassBuilder::<Endpoint>::new("Endpoint")
                    .constructor(
                        vec![
                            ParamSpec::required("pipeline", RomType::class("Pipeline")),
                            ParamSpec::optional("uri", RomType::String),
                        ],
                        |args, _| {
                            Ok(Endpoint {
                                pipeline: args.object("pipeline")?.clone(),
                                uri: args.str("uri").unwrap_or("none").to_owned(),
                            })
                        },
                    )
                    .owned_by("pipeline")
                    .operation("getUri", vec![], RomType::String, |e, _, _| {
                        Ok(e.uri.clone().into())
                    })
                    .operation("getPipeline", vec![], RomType::class("Pipeline"), |e, _, _| {
                        Ok(RomValue::Object(e.pipeline.clone()))
                    })
                    .operation(
                        "scale",
                        vec![ParamSpec::required("factor", RomType::Int)],
                        RomType::Int,
                        |_, args, _| Ok(RomValue::Int(args.int("factor")? * 2)),
                    )
                    .operation(
                        "scale",
                        vec![ParamSpec::required("size", RomType::record("Size"))],
                        RomType::Int,
                        |_, args, _| Ok(args.require("size")?.field("width").cloned().unwrap_or(RomValue::Null)),
                    )
                    .operation(
                        "connect",
                        vec![ParamSpec::required("sink", RomType::class("Endpoint"))],
                        RomType::Void,
                        |_, _, _| Ok(RomValue::Null),
                    )
                    .event("MediaFlowing")
                    .build(),
            )
            .class(
                ClassBuilder::<Player>::new("Player")
                    .extends::<Endpoint>("Endpoint")
                    .constructor(
                        vec![ParamSpec::required("pipeline", RomType::class("Pipeline"))],
                        |args, ctx| {
                            Ok(Player {
                                endpoint: Endpoint {
                                    pipeline: args.object("pipeline")?.clone(),
                                    uri: "player".into(),
                                },
                                emitter: ctx.emitter(),
                            })
                        },
                    )
                    .owned_by("pipeline")
                    .operation("play", vec![], RomType::Void, |p, _, _| {
                        if let Some(em) = &p.emitter {
                            let _ = em.emit("MediaFlowing", &RomValue::from("playing"));
                        }
                        Ok(RomValue::Null)
                    })
                    .build(),
            )
            .build()
            .unwrap()
    }

    fn registry() -> (ObjectRegistry, Arc<Recorder>) {
        let reg = ObjectRegistry::new(classes());
        let rec = Arc::new(Recorder::default());
        reg.set_event_sink(rec.clone());
        (reg, rec)
    }

    #[test]
    fn create_invoke_release_lifecycle() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        assert!(p.as_str().ends_with("_Pipeline"));
        reg.invoke(&p, "setName", &json!({"name": "main"}), None).unwrap();
        assert_eq!(reg.invoke(&p, "getName", &json!({}), None).unwrap(), json!("main"));

        reg.release(&p).unwrap();
        let err = reg.invoke(&p, "getName", &json!({}), None).unwrap_err();
        assert_matches!(err.source, RomError::NoSuchObject { .. });
        assert_matches!(reg.release(&p).unwrap_err().source, RomError::NoSuchObject { .. });
    }

    #[test]
    fn references_never_reused() {
        let (reg, _) = registry();
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let p = reg.create("Pipeline", &Value::Null, None).unwrap();
            assert!(seen.insert(p.clone()));
            reg.release(&p).unwrap();
        }
    }

    #[test]
    fn unknown_type_and_operation() {
        let (reg, _) = registry();
        assert_matches!(
            reg.create("Nope", &Value::Null, None).unwrap_err().source,
            RomError::UnknownType { .. }
        );
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        assert_matches!(
            reg.invoke(&p, "explode", &Value::Null, None).unwrap_err().source,
            RomError::UnknownOperation { .. }
        );
        assert_matches!(
            reg.invoke(&p, "setName", &json!({"title": "x"}), None).unwrap_err().source,
            RomError::UnknownOperation { .. }
        );
    }

    #[test]
    fn constructor_resolves_object_params() {
        let (reg, _) = registry();
        let err = reg
            .create("Endpoint", &json!({"pipeline": "ghost_Pipeline"}), None)
            .unwrap_err();
        assert_matches!(err.source, RomError::Flatten(FlattenError::NoSuchObject { .. }));

        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let e = reg
            .create("Endpoint", &json!({"pipeline": p, "uri": "rtsp://cam"}), None)
            .unwrap();
        assert_eq!(reg.invoke(&e, "getUri", &Value::Null, None).unwrap(), json!("rtsp://cam"));
        assert_eq!(
            reg.invoke(&e, "getPipeline", &Value::Null, None).unwrap(),
            json!(p.as_str())
        );
    }

    #[test]
    fn constructor_rejects_wrong_class() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let e = reg.create("Endpoint", &json!({"pipeline": p}), None).unwrap();
        let err = reg.create("Endpoint", &json!({"pipeline": e}), None).unwrap_err();
        assert_matches!(err.source, RomError::Flatten(FlattenError::ClassMismatch { .. }));
    }

    #[test]
    fn overloads_resolved_in_declaration_order() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let e = reg.create("Endpoint", &json!({"pipeline": p}), None).unwrap();
        assert_eq!(reg.invoke(&e, "scale", &json!({"factor": 4}), None).unwrap(), json!(8));
        assert_eq!(
            reg.invoke(&e, "scale", &json!({"size": {"width": 640}}), None).unwrap(),
            json!(640)
        );
        assert_matches!(
            reg.invoke(&e, "scale", &json!({"factor": "big"}), None).unwrap_err().source,
            RomError::Flatten(FlattenError::ShapeMismatch { .. })
        );
    }

    #[test]
    fn subclass_accepted_where_parent_declared_and_inherits_operations() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let e = reg.create("Endpoint", &json!({"pipeline": p}), None).unwrap();
        let player = reg.create("Player", &json!({"pipeline": p}), None).unwrap();
        reg.invoke(&e, "connect", &json!({"sink": player}), None).unwrap();
        assert_eq!(
            reg.invoke(&player, "getUri", &Value::Null, None).unwrap(),
            json!("player")
        );
    }

    #[test]
    fn release_cascades_to_owned_objects_and_subscriptions() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let e = reg.create("Endpoint", &json!({"pipeline": p}), None).unwrap();
        let _ = reg.subscribe(&e, "MediaFlowing", None).unwrap();
        let _ = reg.subscribe(&p, "Error", None).unwrap();
        assert_eq!(reg.subscription_count(), 2);

        let released = reg.release(&p).unwrap();
        assert_eq!(released.len(), 2);
        assert!(!reg.contains(&e));
        assert_eq!(reg.subscription_count(), 0);
        assert_eq!(reg.object_count(), 0);
    }

    #[test]
    fn application_errors_carry_context() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let err = reg.invoke(&p, "fail", &json!({}), None).unwrap_err();
        assert_eq!(err.type_name.as_deref(), Some("Pipeline"));
        assert_eq!(err.operation.as_deref(), Some("fail"));
        assert_matches!(err.source, RomError::Application { .. });
    }

    #[test]
    fn non_finite_results_and_events_are_not_sent() {
        let (reg, rec) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let err = reg.invoke(&p, "ratio", &Value::Null, None).unwrap_err();
        assert_eq!(err.operation.as_deref(), Some("ratio"));
        assert_matches!(err.source, RomError::Internal { .. });

        let _ = reg.subscribe(&p, "Error", None).unwrap();
        assert_eq!(reg.emit(&p, "Error", &RomValue::Float(f64::INFINITY)), 0);
        assert!(rec.0.lock().is_empty());
    }

    #[test]
    fn subscribe_validates_declared_events() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let player = reg.create("Player", &json!({"pipeline": p}), None).unwrap();
        assert!(reg.subscribe(&player, "MediaFlowing", None).is_ok());
        assert_matches!(
            reg.subscribe(&p, "MediaFlowing", None).unwrap_err().source,
            RomError::UnknownEvent { .. }
        );
    }

    #[test]
    fn events_reach_subscribed_sessions() {
        let (reg, rec) = registry();
        let s1 = SessionId::from("s1");
        let p = reg.create("Pipeline", &Value::Null, Some(&s1)).unwrap();
        let player = reg.create("Player", &json!({"pipeline": p}), Some(&s1)).unwrap();
        let sub = reg.subscribe(&player, "MediaFlowing", Some(&s1)).unwrap();

        reg.invoke(&player, "play", &Value::Null, Some(&s1)).unwrap();
        let events = rec.0.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0.as_ref(), Some(&s1));
        assert_eq!(events[0].1.subscription, sub);
        assert_eq!(events[0].1.data, json!("playing"));

        reg.unsubscribe(&player, &sub).unwrap();
        assert_eq!(reg.emit(&player, "MediaFlowing", &RomValue::Null), 0);
        assert_matches!(
            reg.unsubscribe(&player, &sub).unwrap_err().source,
            RomError::NoSuchSubscription { .. }
        );
    }

    #[test]
    fn release_session_drops_its_objects_only() {
        let (reg, _) = registry();
        let s1 = SessionId::from("s1");
        let s2 = SessionId::from("s2");
        let p1 = reg.create("Pipeline", &Value::Null, Some(&s1)).unwrap();
        let _e1 = reg.create("Endpoint", &json!({"pipeline": p1}), Some(&s1)).unwrap();
        let p2 = reg.create("Pipeline", &Value::Null, Some(&s2)).unwrap();

        let released = reg.release_session(&s1);
        assert_eq!(released.len(), 2);
        assert!(reg.contains(&p2));
        assert_eq!(reg.release_all(), 1);
    }

    #[test]
    fn native_instances_reachable() {
        let (reg, _) = registry();
        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
        let native = reg.get::<Pipeline>(&p).unwrap();
        *native.name.lock() = "direct".into();
        assert_eq!(reg.invoke(&p, "getName", &Value::Null, None).unwrap(), json!("direct"));
        assert_matches!(reg.get::<Endpoint>(&p), Err(RomError::Internal { .. }));
    }

    #[test]
    fn concurrent_create_and_release() {
        let (reg, _) = registry();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let p = reg.create("Pipeline", &Value::Null, None).unwrap();
                        let _ = reg.invoke(&p, "getName", &Value::Null, None).unwrap();
                        reg.release(&p).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.object_count(), 0);
    }
}
