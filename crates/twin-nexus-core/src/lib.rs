//! # Twin Nexus Core
//!
//! In-process digital twin core for IoT gateways: schema registry, provider
//! instance store, timestamp-gated update engine, link graph and the
//! merge/save boundary.
//!
//! This crate provides:
//! - Runtime-minted models: namespaces, service types and resource
//!   definitions created on the fly, no code generation
//! - A per-resource last-writer-wins update engine with a 1ms tolerance
//!   window and silent drop of stale writes
//! - A bidirectional provider link graph with cascading deletion
//! - Debounced, batched change notifications per logical transaction
//! - A pluggable compare-and-set strategy reconciling detached provider
//!   graphs into the store
//! - An async whiteboard dispatching act/pull/push calls to device handlers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod merge;
pub mod metadata;
pub mod naming;
pub mod nexus;
pub mod notification;
pub mod provider;
pub mod schema;
pub mod value;
pub mod whiteboard;

pub use error::{ErrorKind, NexusError, WhiteboardError};
pub use merge::{CompareAndSet, StructuralDiff};
pub use metadata::{MetadataValue, ResourceMetadata};
pub use nexus::{ModelNexus, UpdateOutcome};
pub use notification::{
    LifecycleNotification, LifecycleStatus, LinkNotification, Notification,
    NotificationAccumulator, NotificationSink, NullSink, ResourceActionNotification,
    ResourceDataNotification, ResourceMetadataNotification,
};
pub use provider::{AdminService, Provider, ResourceSlot, ServiceInstance, ServiceOrigin, ServiceSlot};
pub use schema::{
    ModelDescriptor, Namespace, ResourceCapabilities, ResourceDef, ResourceKind, SchemaRegistry,
    ServiceTypeDescriptor, DEFAULT_NAMESPACE,
};
pub use value::{coerce, instant_value, Cardinality, TimedValue, ValueKind, ValueType};
pub use whiteboard::{
    ActHandler, ExternalValue, PullHandler, PushHandler, Whiteboard, WhiteboardFuture,
};
