//! Schema registry: namespaces, model descriptors, service types.
//!
//! Types are minted at runtime. A model is a registry entry mapping
//! `(namespace, name)` to a structural descriptor: an ordered set of service
//! slot declarations referencing named service types, which in turn hold
//! typed resource and action definitions. Instances hold a descriptor
//! reference by name plus their own value maps, so no host-language type
//! generation is ever needed.
//!
//! Every structural mutation increments the owning descriptor's version
//! counter and advances its timestamp.

use crate::error::NexusError;
use crate::metadata::MetadataValue;
use crate::naming;
use crate::value::{ValueKind, ValueType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// URI of the namespace that always exists.
pub const DEFAULT_NAMESPACE: &str = "https://twin-nexus.io/default";

/// What a resource represents on the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// A measured quantity
    #[default]
    Sensor,
    /// A controllable output
    Actuator,
    /// A static or configured property
    Property,
    /// Internal device state
    State,
    /// An invokable operation
    Action,
}

/// External read/write capabilities of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceCapabilities {
    /// The value can be pulled from an external getter
    pub external_get: bool,
    /// How long a pulled value stays fresh, in milliseconds
    pub external_get_cache_ms: Option<u64>,
    /// The value can be pushed to an external setter
    pub external_set: bool,
}

/// Definition of a single data resource within a service type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Sanitized resource identifier
    pub name: String,
    /// The originally requested name
    pub original_name: String,
    /// Declared value type
    pub value_type: ValueType,
    /// Resource kind
    pub kind: ResourceKind,
    /// External capabilities
    pub capabilities: ResourceCapabilities,
    /// When the definition was created
    pub created_at: DateTime<Utc>,
    /// Default value applied when no update has been accepted yet
    pub default_value: Option<Value>,
    /// Metadata entries every new resource value starts with
    pub default_metadata: BTreeMap<String, MetadataValue>,
}

/// A named, typed parameter of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParameter {
    /// Parameter name
    pub name: String,
    /// Parameter kind
    pub kind: ValueKind,
}

/// Definition of an invokable action within a service type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    /// Sanitized action identifier
    pub name: String,
    /// The originally requested name
    pub original_name: String,
    /// Kind of the action result
    pub return_kind: ValueKind,
    /// Ordered named parameters
    pub parameters: Vec<ActionParameter>,
    /// When the definition was created
    pub created_at: DateTime<Utc>,
}

/// A named structural group of resources, referenced from model slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTypeDescriptor {
    /// Unique type name within the namespace
    pub name: String,
    /// Structural version, incremented on every mutation
    pub version: u64,
    /// Timestamp of the last structural mutation
    pub timestamp: DateTime<Utc>,
    resources: BTreeMap<String, ResourceDef>,
    actions: BTreeMap<String, ActionDef>,
}

impl ServiceTypeDescriptor {
    fn new(name: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            name,
            version: 1,
            timestamp,
            resources: BTreeMap::new(),
            actions: BTreeMap::new(),
        }
    }

    /// Look up a resource definition.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.get(name)
    }

    /// Look up an action definition.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionDef> {
        self.actions.get(name)
    }

    /// Iterate the declared data resources.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDef> {
        self.resources.values()
    }

    /// Iterate the declared actions.
    pub fn actions(&self) -> impl Iterator<Item = &ActionDef> {
        self.actions.values()
    }

    /// Whether any field or operation with this name exists.
    #[must_use]
    pub fn contains_field(&self, name: &str) -> bool {
        self.resources.contains_key(name) || self.actions.contains_key(name)
    }

    fn bump(&mut self, timestamp: DateTime<Utc>) {
        self.version += 1;
        self.timestamp = timestamp;
    }
}

/// A declared service slot on a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDecl {
    /// Field name of the slot on the model
    pub field_name: String,
    /// The originally requested field name
    pub original_name: String,
    /// Name of the service type the slot is an instance of
    pub type_name: String,
    /// When the slot was declared
    pub created_at: DateTime<Utc>,
}

/// Structural type definition for a class of providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Sanitized type identifier
    pub ident: String,
    /// The originally requested model name; registry lookups use this
    pub display_name: String,
    /// Owning namespace URI
    pub namespace: String,
    /// When the model was created
    pub created_at: DateTime<Utc>,
    /// Structural version, incremented on every mutation
    pub version: u64,
    /// Timestamp of the last structural mutation
    pub timestamp: DateTime<Utc>,
    /// Whether instances may carry ad hoc services beyond the declared slots
    pub dynamic: bool,
    services: BTreeMap<String, ServiceDecl>,
}

impl ModelDescriptor {
    /// Look up a declared service slot by field name.
    #[must_use]
    pub fn service(&self, field_name: &str) -> Option<&ServiceDecl> {
        self.services.get(field_name)
    }

    /// Iterate the declared service slots.
    pub fn services(&self) -> impl Iterator<Item = &ServiceDecl> {
        self.services.values()
    }

    /// Whether a field with this name is declared on the model.
    #[must_use]
    pub fn declares(&self, field_name: &str) -> bool {
        self.services.contains_key(field_name)
    }
}

/// A named scope holding model and service type definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// URI-like namespace identifier
    pub uri: String,
    models: BTreeMap<String, ModelDescriptor>,
    service_types: BTreeMap<String, ServiceTypeDescriptor>,
}

impl Namespace {
    fn new(uri: String) -> Self {
        Self {
            uri,
            models: BTreeMap::new(),
            service_types: BTreeMap::new(),
        }
    }

    /// Look up a model by display name.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.get(name)
    }

    /// Look up a service type by type name.
    #[must_use]
    pub fn service_type(&self, name: &str) -> Option<&ServiceTypeDescriptor> {
        self.service_types.get(name)
    }

    /// Iterate the models of this namespace.
    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }
}

/// The registry owning all namespaces and type descriptors of one Nexus.
///
/// Not a process-wide singleton: each Nexus instance owns exactly one
/// registry whose lifecycle matches the Nexus.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    namespaces: BTreeMap<String, Namespace>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Create a registry holding only the default namespace.
    #[must_use]
    pub fn new() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(
            DEFAULT_NAMESPACE.to_string(),
            Namespace::new(DEFAULT_NAMESPACE.to_string()),
        );
        Self { namespaces }
    }

    /// Create a namespace if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::EmptyName`] for a blank URI.
    pub fn create_namespace(&mut self, uri: &str) -> Result<&Namespace, NexusError> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(NexusError::EmptyName);
        }
        Ok(self
            .namespaces
            .entry(trimmed.to_string())
            .or_insert_with(|| Namespace::new(trimmed.to_string())))
    }

    /// Look up a namespace.
    #[must_use]
    pub fn namespace(&self, uri: &str) -> Option<&Namespace> {
        self.namespaces.get(uri)
    }

    /// Iterate all namespaces.
    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    /// Create a model in the given namespace, or the default one.
    ///
    /// The requested name is sanitized into the structural identifier while
    /// the original string is preserved for lookups and display.
    ///
    /// # Errors
    ///
    /// [`NexusError::ModelExists`] if the name is already taken in the
    /// namespace, [`NexusError::EmptyName`] for a blank name.
    pub fn create_model(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<&ModelDescriptor, NexusError> {
        self.create_model_with(namespace, name, false, timestamp)
    }

    /// Create a model whose instances accept ad hoc dynamic services.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_model`].
    pub fn create_dynamic_model(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<&ModelDescriptor, NexusError> {
        self.create_model_with(namespace, name, true, timestamp)
    }

    fn create_model_with(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        dynamic: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<&ModelDescriptor, NexusError> {
        let ident = naming::type_ident(name)?;
        let uri = namespace.unwrap_or(DEFAULT_NAMESPACE).to_string();
        let ns = self
            .namespaces
            .entry(uri.clone())
            .or_insert_with(|| Namespace::new(uri.clone()));
        if ns.models.contains_key(name) {
            return Err(NexusError::ModelExists {
                namespace: uri,
                name: name.to_string(),
            });
        }
        let descriptor = ModelDescriptor {
            ident,
            display_name: name.to_string(),
            namespace: uri,
            created_at: timestamp,
            version: 1,
            timestamp,
            dynamic,
            services: BTreeMap::new(),
        };
        Ok(ns.models.entry(name.to_string()).or_insert(descriptor))
    }

    /// Look up a model by namespace URI and display name.
    #[must_use]
    pub fn get_model(&self, namespace: &str, name: &str) -> Option<&ModelDescriptor> {
        self.namespaces.get(namespace).and_then(|ns| ns.model(name))
    }

    /// Whether a model with this name is registered in the namespace.
    #[must_use]
    pub fn registered(&self, namespace: &str, name: &str) -> bool {
        self.get_model(namespace, name).is_some()
    }

    /// Names of all models in a namespace.
    #[must_use]
    pub fn model_names(&self, namespace: &str) -> Vec<String> {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.models.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Declare a service slot on a model.
    ///
    /// The slot references a service type named after the model and the
    /// requested type name; the type is minted on first use. Two sibling
    /// slots naming the same type share one definition, which is legal but
    /// logged, since a structural change through one slot is visible
    /// through the other.
    ///
    /// # Errors
    ///
    /// [`NexusError::ModelNotFound`] for an unknown model,
    /// [`NexusError::ServiceExists`] if the field name is already taken.
    pub fn create_service(
        &mut self,
        namespace: &str,
        model: &str,
        field_name: &str,
        service_type: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<&ServiceDecl, NexusError> {
        let field = naming::sanitize(field_name)?;
        let type_name = {
            let descriptor = self.require_model(namespace, model)?;
            naming::service_type_name(&descriptor.ident, service_type)?
        };

        let ns = self
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| NexusError::NamespaceNotFound(namespace.to_string()))?;

        if ns.service_types.contains_key(&type_name) {
            tracing::warn!(
                namespace,
                model,
                service_type = %type_name,
                "service slot shares an existing structural type definition"
            );
        } else {
            ns.service_types
                .insert(type_name.clone(), ServiceTypeDescriptor::new(type_name.clone(), timestamp));
        }

        let descriptor = ns
            .models
            .get_mut(model)
            .ok_or_else(|| NexusError::ModelNotFound {
                namespace: namespace.to_string(),
                name: model.to_string(),
            })?;
        if descriptor.services.contains_key(&field) {
            return Err(NexusError::ServiceExists {
                model: model.to_string(),
                field,
            });
        }
        descriptor.version += 1;
        descriptor.timestamp = timestamp;
        let decl = ServiceDecl {
            field_name: field.clone(),
            original_name: field_name.to_string(),
            type_name,
            created_at: timestamp,
        };
        Ok(descriptor.services.entry(field).or_insert(decl))
    }

    /// Add a data resource definition to a service type.
    ///
    /// # Errors
    ///
    /// [`NexusError::ResourceExists`] if any field or operation with this
    /// name exists on the type, [`NexusError::NamespaceNotFound`] /
    /// [`NexusError::ServiceTypeNotFound`] for unknown referents.
    #[allow(clippy::too_many_arguments)]
    pub fn create_resource(
        &mut self,
        namespace: &str,
        service_type: &str,
        name: &str,
        value_type: ValueType,
        timestamp: DateTime<Utc>,
        default_value: Option<Value>,
        default_metadata: BTreeMap<String, MetadataValue>,
        capabilities: ResourceCapabilities,
    ) -> Result<&ResourceDef, NexusError> {
        let ident = naming::sanitize(name)?;
        let ty = self.require_service_type_mut(namespace, service_type)?;
        if ty.contains_field(&ident) {
            return Err(NexusError::ResourceExists {
                service: service_type.to_string(),
                resource: ident,
            });
        }
        ty.bump(timestamp);
        let def = ResourceDef {
            name: ident.clone(),
            original_name: name.to_string(),
            value_type,
            kind: ResourceKind::default(),
            capabilities,
            created_at: timestamp,
            default_value,
            default_metadata,
        };
        Ok(ty.resources.entry(ident).or_insert(def))
    }

    /// Add an action definition to a service type.
    ///
    /// # Errors
    ///
    /// Same collision and lookup rules as [`Self::create_resource`].
    pub fn create_action(
        &mut self,
        namespace: &str,
        service_type: &str,
        name: &str,
        return_kind: ValueKind,
        parameters: Vec<ActionParameter>,
        timestamp: DateTime<Utc>,
    ) -> Result<&ActionDef, NexusError> {
        let ident = naming::sanitize(name)?;
        let ty = self.require_service_type_mut(namespace, service_type)?;
        if ty.contains_field(&ident) {
            return Err(NexusError::ResourceExists {
                service: service_type.to_string(),
                resource: ident,
            });
        }
        ty.bump(timestamp);
        let def = ActionDef {
            name: ident.clone(),
            original_name: name.to_string(),
            return_kind,
            parameters,
            created_at: timestamp,
        };
        Ok(ty.actions.entry(ident).or_insert(def))
    }

    /// Change the kind of an existing resource definition.
    ///
    /// # Errors
    ///
    /// Lookup errors as for [`Self::create_resource`].
    pub fn set_resource_kind(
        &mut self,
        namespace: &str,
        service_type: &str,
        resource: &str,
        kind: ResourceKind,
        timestamp: DateTime<Utc>,
    ) -> Result<(), NexusError> {
        let ty = self.require_service_type_mut(namespace, service_type)?;
        let def = ty
            .resources
            .get_mut(resource)
            .ok_or_else(|| NexusError::ResourceNotFound {
                service: service_type.to_string(),
                resource: resource.to_string(),
            })?;
        def.kind = kind;
        ty.bump(timestamp);
        Ok(())
    }

    /// Remove a model definition, dropping its namespace if now empty.
    ///
    /// Cascading deletion of the model's provider instances is the caller's
    /// responsibility; the Nexus orchestrates it before calling here. The
    /// default namespace itself always survives, even when emptied.
    ///
    /// # Errors
    ///
    /// [`NexusError::ModelNotFound`] / [`NexusError::NamespaceNotFound`].
    pub fn remove_model(
        &mut self,
        namespace: &str,
        name: &str,
    ) -> Result<ModelDescriptor, NexusError> {
        let ns = self
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| NexusError::NamespaceNotFound(namespace.to_string()))?;
        let descriptor = ns.models.remove(name).ok_or_else(|| NexusError::ModelNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        for decl in descriptor.services.values() {
            let shared = ns
                .models
                .values()
                .any(|m| m.services.values().any(|d| d.type_name == decl.type_name));
            if !shared {
                ns.service_types.remove(&decl.type_name);
            }
        }
        if ns.models.is_empty() && namespace != DEFAULT_NAMESPACE {
            self.namespaces.remove(namespace);
        }
        Ok(descriptor)
    }

    /// Remove a namespace and every model in it.
    ///
    /// # Errors
    ///
    /// [`NexusError::NamespaceNotFound`] for an unknown URI.
    pub fn remove_namespace(&mut self, namespace: &str) -> Result<Vec<ModelDescriptor>, NexusError> {
        let ns = self
            .namespaces
            .remove(namespace)
            .ok_or_else(|| NexusError::NamespaceNotFound(namespace.to_string()))?;
        if namespace == DEFAULT_NAMESPACE {
            self.namespaces.insert(
                DEFAULT_NAMESPACE.to_string(),
                Namespace::new(DEFAULT_NAMESPACE.to_string()),
            );
        }
        Ok(ns.models.into_values().collect())
    }

    /// Resolve the service type backing a declared slot of a model.
    #[must_use]
    pub fn service_type_of(
        &self,
        namespace: &str,
        model: &str,
        field_name: &str,
    ) -> Option<&ServiceTypeDescriptor> {
        let descriptor = self.get_model(namespace, model)?;
        let decl = descriptor.service(field_name)?;
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.service_type(&decl.type_name))
    }

    fn require_model(&self, namespace: &str, model: &str) -> Result<&ModelDescriptor, NexusError> {
        self.get_model(namespace, model)
            .ok_or_else(|| NexusError::ModelNotFound {
                namespace: namespace.to_string(),
                name: model.to_string(),
            })
    }

    fn require_service_type_mut(
        &mut self,
        namespace: &str,
        service_type: &str,
    ) -> Result<&mut ServiceTypeDescriptor, NexusError> {
        self.namespaces
            .get_mut(namespace)
            .ok_or_else(|| NexusError::NamespaceNotFound(namespace.to_string()))?
            .service_types
            .get_mut(service_type)
            .ok_or_else(|| NexusError::ServiceTypeNotFound {
                namespace: namespace.to_string(),
                name: service_type.to_string(),
            })
    }
}
