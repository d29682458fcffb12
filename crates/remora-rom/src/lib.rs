//! # remora-rom
//!
//! The Remote Object Model: a graph of stateful objects living in one
//! process, manipulated by another over JSON-RPC.
//!
//! - [`value`]: the tagged value model exchanged with object implementations
//! - [`types`]: declared types (enums, records, classes with inheritance)
//! - [`flatten`]: value ⇄ wire conversion driven by the expected type
//! - [`class`]: per-class dispatch tables built once at startup
//! - [`registry`]: the server-side live object set
//! - [`client`]: client-side proxies and event routing
//! - [`event`]: `onEvent` payloads

#![deny(unsafe_code)]

pub mod class;
pub mod client;
pub mod errors;
pub mod event;
pub mod flatten;
pub mod registry;
pub mod types;
pub mod value;

pub use class::{Args, ClassBuilder, ClassDef, ClassRegistry, ClassRegistryBuilder, ParamSpec};
pub use client::{ClientObjectManager, DropHook, EventListener, RemoteProxy};
pub use errors::{DispatchError, FlattenError, RomError};
pub use event::RomEvent;
pub use flatten::{ObjectResolver, UncheckedResolver, flatten, unflatten};
pub use registry::{EventEmitter, EventSink, InvokeContext, ObjectRegistry};
pub use types::{FieldSpec, RomType, TypeSchema};
pub use value::RomValue;
