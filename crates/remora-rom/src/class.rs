//! Per-class dispatch tables.
//!
//! Every remotely usable class is declared once, at startup, with a
//! [`ClassBuilder`]: its constructor (if instantiable), its operations with
//! their parameter lists and return types, the events it emits, and its
//! parent. Only what is declared here can be created, invoked or subscribed
//! to. [`ClassRegistryBuilder::build`] rejects declarations that mention
//! undeclared types, duplicate overloads and broken hierarchies.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use remora_core::ObjectRef;
use serde_json::Value;

use crate::errors::{FlattenError, RomError};
use crate::flatten::{ObjectResolver, unflatten};
use crate::registry::InvokeContext;
use crate::types::{FieldSpec, RomType, TypeSchema};
use crate::value::RomValue;

/// Type-erased object instance.
pub type DynObject = dyn Any + Send + Sync;

/// Declared parameter of a constructor or operation.
pub type ParamSpec = FieldSpec;

type ConstructFn = Arc<dyn Fn(&Args, &InvokeContext) -> Result<Arc<DynObject>, RomError> + Send + Sync>;
type OperationFn =
    Arc<dyn Fn(&DynObject, &Args, &InvokeContext) -> Result<RomValue, RomError> + Send + Sync>;
pub(crate) type UpcastFn = fn(&DynObject) -> Option<&DynObject>;

// ─────────────────────────────────────────────────────────────────────────────
// Args
// ─────────────────────────────────────────────────────────────────────────────

/// Decoded arguments of one call, keyed by parameter name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    values: BTreeMap<String, RomValue>,
}

impl Args {
    /// Wrap decoded values.
    pub fn new(values: BTreeMap<String, RomValue>) -> Self {
        Self { values }
    }

    /// Value of a parameter, if supplied.
    pub fn get(&self, name: &str) -> Option<&RomValue> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Value of a parameter that must be supplied.
    pub fn require(&self, name: &str) -> Result<&RomValue, RomError> {
        self.get(name)
            .ok_or_else(|| RomError::invalid_params(format!("missing parameter {name}")))
    }

    /// Text parameter.
    pub fn str(&self, name: &str) -> Result<&str, RomError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| RomError::invalid_params(format!("parameter {name} is not text")))
    }

    /// Integer parameter.
    pub fn int(&self, name: &str) -> Result<i64, RomError> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| RomError::invalid_params(format!("parameter {name} is not an integer")))
    }

    /// Numeric parameter.
    pub fn float(&self, name: &str) -> Result<f64, RomError> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| RomError::invalid_params(format!("parameter {name} is not a number")))
    }

    /// Boolean parameter.
    pub fn bool(&self, name: &str) -> Result<bool, RomError> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| RomError::invalid_params(format!("parameter {name} is not a boolean")))
    }

    /// Object reference parameter.
    pub fn object(&self, name: &str) -> Result<&ObjectRef, RomError> {
        self.require(name)?.as_object().ok_or_else(|| {
            RomError::invalid_params(format!("parameter {name} is not an object reference"))
        })
    }

    /// Number of supplied parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no parameters were supplied.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Why a parameter bag did not bind to a declared signature.
#[derive(Debug)]
pub(crate) enum BindFailure {
    /// Keys do not fit the signature (wrong names, missing required).
    Structure(String),
    /// Keys fit, a value did not decode.
    Value(FlattenError),
}

/// Bind raw wire params to a declared signature.
pub(crate) fn bind_args(
    params: &[ParamSpec],
    raw: &Value,
    schema: &TypeSchema,
    resolver: &dyn ObjectResolver,
) -> Result<Args, BindFailure> {
    let empty = serde_json::Map::new();
    let obj = match raw {
        Value::Null => &empty,
        Value::Object(obj) => obj,
        other => {
            return Err(BindFailure::Structure(format!(
                "parameters must be an object, got {other}"
            )));
        }
    };
    if let Some(unknown) = obj.keys().find(|k| !params.iter().any(|p| &p.name == *k)) {
        return Err(BindFailure::Structure(format!("unexpected parameter {unknown}")));
    }
    if let Some(missing) = params
        .iter()
        .find(|p| !p.optional && obj.get(&p.name).is_none_or(Value::is_null))
    {
        return Err(BindFailure::Structure(format!(
            "missing parameter {}",
            missing.name
        )));
    }
    let mut values = BTreeMap::new();
    for param in params {
        if let Some(raw) = obj.get(&param.name) {
            let value =
                unflatten(raw, &param.ty, schema, resolver).map_err(BindFailure::Value)?;
            let _ = values.insert(param.name.clone(), value);
        }
    }
    Ok(Args::new(values))
}

// ─────────────────────────────────────────────────────────────────────────────
// Class definitions
// ─────────────────────────────────────────────────────────────────────────────

/// A declared constructor.
#[derive(Clone)]
pub struct Constructor {
    /// Declared parameters.
    pub params: Vec<ParamSpec>,
    handler: ConstructFn,
}

impl Constructor {
    pub(crate) fn call(&self, args: &Args, ctx: &InvokeContext) -> Result<Arc<DynObject>, RomError> {
        (self.handler)(args, ctx)
    }
}

/// A declared operation.
#[derive(Clone)]
pub struct Operation {
    /// Operation name.
    pub name: String,
    /// Declared parameters.
    pub params: Vec<ParamSpec>,
    /// Declared return type.
    pub returns: RomType,
    handler: OperationFn,
}

impl Operation {
    pub(crate) fn call(
        &self,
        object: &DynObject,
        args: &Args,
        ctx: &InvokeContext,
    ) -> Result<RomValue, RomError> {
        (self.handler)(object, args, ctx)
    }

    fn signature(&self) -> Vec<(&str, &RomType)> {
        let mut sig: Vec<_> = self
            .params
            .iter()
            .map(|p| (p.name.as_str(), &p.ty))
            .collect();
        sig.sort_by(|a, b| a.0.cmp(b.0));
        sig
    }
}

/// Dispatch table for one class.
#[derive(Clone)]
pub struct ClassDef {
    name: String,
    parent: Option<String>,
    upcast: Option<UpcastFn>,
    constructor: Option<Constructor>,
    owner_param: Option<String>,
    operations: Vec<Operation>,
    events: Vec<String>,
}

impl ClassDef {
    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent class, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Constructor, if the class is instantiable.
    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    /// Constructor parameter naming the owning object.
    pub fn owner_param(&self) -> Option<&str> {
        self.owner_param.as_deref()
    }

    /// Operations declared directly on this class, in declaration order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Events declared directly on this class.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub(crate) fn upcast(&self) -> Option<UpcastFn> {
        self.upcast
    }

    pub(crate) fn operations_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Operation> + 'a {
        self.operations.iter().filter(move |op| op.name == name)
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("instantiable", &self.constructor.is_some())
            .field("owner_param", &self.owner_param)
            .field(
                "operations",
                &self.operations.iter().map(|o| &o.name).collect::<Vec<_>>(),
            )
            .field("events", &self.events)
            .finish()
    }
}

fn upcast_to<T, P>(object: &DynObject) -> Option<&DynObject>
where
    T: AsRef<P> + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    object
        .downcast_ref::<T>()
        .map(|t| <T as AsRef<P>>::as_ref(t) as &DynObject)
}

/// Declares a class whose instances are values of `T`.
///
/// ```ignore
/// let pipeline = ClassBuilder::<Pipeline>::new("Pipeline")
///     .constructor(vec![], |_, _| Ok(Pipeline::default()))
///     .operation("getName", vec![], RomType::String, |p, _, _| Ok(p.name().into()))
///     .event("Error")
///     .build();
/// ```
pub struct ClassBuilder<T> {
    def: ClassDef,
    _object: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ClassBuilder<T> {
    /// Start declaring class `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: ClassDef {
                name: name.into(),
                parent: None,
                upcast: None,
                constructor: None,
                owner_param: None,
                operations: Vec::new(),
                events: Vec::new(),
            },
            _object: PhantomData,
        }
    }

    /// Inherit operations and events of `parent`, whose instances are `P`.
    ///
    /// Inherited operations run against the `P` that `T` exposes via `AsRef`.
    #[must_use]
    pub fn extends<P>(mut self, parent: impl Into<String>) -> Self
    where
        T: AsRef<P>,
        P: Send + Sync + 'static,
    {
        self.def.parent = Some(parent.into());
        self.def.upcast = Some(upcast_to::<T, P>);
        self
    }

    /// Make the class instantiable through `create`.
    #[must_use]
    pub fn constructor<F>(mut self, params: Vec<ParamSpec>, f: F) -> Self
    where
        F: Fn(&Args, &InvokeContext) -> Result<T, RomError> + Send + Sync + 'static,
    {
        let handler: ConstructFn = Arc::new(move |args: &Args, ctx: &InvokeContext| {
            f(args, ctx).map(|object| Arc::new(object) as Arc<DynObject>)
        });
        self.def.constructor = Some(Constructor { params, handler });
        self
    }

    /// Declare the constructor parameter whose object owns new instances.
    /// Releasing the owner releases the instance.
    #[must_use]
    pub fn owned_by(mut self, param: impl Into<String>) -> Self {
        self.def.owner_param = Some(param.into());
        self
    }

    /// Declare an operation. Overloads are tried in declaration order.
    #[must_use]
    pub fn operation<F>(
        mut self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        returns: RomType,
        f: F,
    ) -> Self
    where
        F: Fn(&T, &Args, &InvokeContext) -> Result<RomValue, RomError> + Send + Sync + 'static,
    {
        let class = self.def.name.clone();
        let handler: OperationFn =
            Arc::new(move |object: &DynObject, args: &Args, ctx: &InvokeContext| {
                let this = object.downcast_ref::<T>().ok_or_else(|| RomError::Internal {
                    message: format!("instance does not have the native type of {class}"),
                })?;
                f(this, args, ctx)
            });
        self.def.operations.push(Operation {
            name: name.into(),
            params,
            returns,
            handler,
        });
        self
    }

    /// Declare an event type instances may emit.
    #[must_use]
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.def.events.push(name.into());
        self
    }

    /// Finish the declaration.
    pub fn build(self) -> ClassDef {
        self.def
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// All declared classes plus the type schema they reference.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    schema: TypeSchema,
    classes: HashMap<String, ClassDef>,
}

impl ClassRegistry {
    /// Start declaring a registry.
    pub fn builder() -> ClassRegistryBuilder {
        ClassRegistryBuilder::default()
    }

    /// Types known to the registry, classes included.
    pub fn schema(&self) -> &TypeSchema {
        &self.schema
    }

    /// Look up a class.
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    /// The class followed by its ancestors.
    pub fn lineage<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a ClassDef> + 'a {
        std::iter::successors(self.classes.get(name), move |def| {
            def.parent().and_then(|p| self.classes.get(p))
        })
    }

    /// Whether `class` or an ancestor declares `event_type`.
    pub fn declares_event(&self, class: &str, event_type: &str) -> bool {
        self.lineage(class)
            .any(|def| def.events.iter().any(|e| e == event_type))
    }

    /// Sorted class names.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Collects class declarations and validates them.
#[derive(Default)]
pub struct ClassRegistryBuilder {
    schema: TypeSchema,
    classes: Vec<ClassDef>,
}

impl ClassRegistryBuilder {
    /// Use `schema` for enums and records.
    #[must_use]
    pub fn schema(mut self, schema: TypeSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Add a class.
    #[must_use]
    pub fn class(mut self, def: ClassDef) -> Self {
        self.classes.push(def);
        self
    }

    /// Validate every declaration and freeze the registry.
    pub fn build(self) -> Result<ClassRegistry, RomError> {
        let Self {
            mut schema,
            classes: defs,
        } = self;
        let schema_err = |message: String| RomError::Schema { message };

        let mut classes = HashMap::new();
        for def in defs {
            schema.add_class(def.name.clone(), def.parent.as_deref());
            let name = def.name.clone();
            if classes.insert(name.clone(), def).is_some() {
                return Err(schema_err(format!("class {name} declared twice")));
            }
        }
        schema.validate()?;

        for def in classes.values() {
            let class = &def.name;
            if def.parent.is_some() != def.upcast.is_some() {
                return Err(schema_err(format!("class {class} has no native parent view")));
            }
            if let Some(ctor) = &def.constructor {
                check_params(&schema, &ctor.params, || format!("constructor of {class}"))?;
            }
            if let Some(owner) = &def.owner_param {
                let declared = def
                    .constructor
                    .as_ref()
                    .and_then(|c| c.params.iter().find(|p| &p.name == owner));
                match declared {
                    Some(p) if matches!(p.ty, RomType::Class(_)) && !p.optional => {}
                    _ => {
                        return Err(schema_err(format!(
                            "owner parameter {owner} of {class} must be a required object reference"
                        )));
                    }
                }
            }
            let mut signatures = HashSet::new();
            for op in &def.operations {
                check_params(&schema, &op.params, || format!("{class}.{}", op.name))?;
                schema.check_type(&op.returns).map_err(|_| {
                    schema_err(format!("{class}.{} returns undeclared type {}", op.name, op.returns))
                })?;
                if !signatures.insert((op.name.as_str(), op.signature())) {
                    return Err(schema_err(format!(
                        "{class}.{} declared twice with the same parameters",
                        op.name
                    )));
                }
            }
            let mut events = HashSet::new();
            for event in &def.events {
                if !events.insert(event) {
                    return Err(schema_err(format!("{class} declares event {event} twice")));
                }
            }
        }

        Ok(ClassRegistry { schema, classes })
    }
}

fn check_params(
    schema: &TypeSchema,
    params: &[ParamSpec],
    context: impl Fn() -> String,
) -> Result<(), RomError> {
    let mut seen = HashSet::new();
    for p in params {
        if !seen.insert(p.name.as_str()) {
            return Err(RomError::Schema {
                message: format!("{} declares parameter {} twice", context(), p.name),
            });
        }
        schema.check_type(&p.ty).map_err(|_| RomError::Schema {
            message: format!(
                "{} parameter {} has undeclared type {}",
                context(),
                p.name,
                p.ty
            ),
        })?;
    }
    Ok(())
}
