//! Provider instances: the live value side of the twin.
//!
//! A provider is an instance of a registered model. It holds its admin
//! service (identity, description, link list), a map of service slots with
//! timestamped resource values, and nothing else; structure lives in the
//! schema registry. All types derive [`Clone`], so a snapshot handed out of
//! the Nexus is a deep copy that cannot alias internal state.

use crate::metadata::ResourceMetadata;
use crate::schema::DEFAULT_NAMESPACE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How a service slot came to exist on a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceOrigin {
    /// The slot is declared on the provider's model
    Declared,
    /// The slot was added ad hoc to an instance of a dynamic model
    Dynamic,
}

/// One resource's stored state inside a service instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSlot {
    /// Current value, if any update has been accepted
    pub value: Option<Value>,
    /// Metadata, set once the first update is accepted
    pub metadata: Option<ResourceMetadata>,
}

impl ResourceSlot {
    /// The timestamp of the last accepted update, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().and_then(|m| m.timestamp)
    }

    /// Whether the slot has ever carried a value.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.metadata.is_some()
    }
}

/// The value store of one materialized service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Resource values keyed by resource name
    pub resources: BTreeMap<String, ResourceSlot>,
}

impl ServiceInstance {
    /// Resource names that currently carry a value.
    #[must_use]
    pub fn valued_resources(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// A service slot on a provider: its origin plus its value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSlot {
    /// Declared on the model, or dynamically added
    pub origin: ServiceOrigin,
    /// The materialized instance
    pub instance: ServiceInstance,
}

impl ServiceSlot {
    /// An empty slot with the given origin.
    #[must_use]
    pub fn new(origin: ServiceOrigin) -> Self {
        Self {
            origin,
            instance: ServiceInstance::default(),
        }
    }
}

/// The built-in service every provider carries.
///
/// Admin fields are untyped resources with per-field metadata; `friendlyName`
/// defaults to the provider name and `modelUri` to the model identity when
/// the instance is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminService {
    /// Human-readable provider name
    pub friendly_name: Option<Value>,
    /// Free-form description
    pub description: Option<Value>,
    /// Display name of the provider's model
    pub model_name: Option<Value>,
    /// Namespace URI of the provider's model
    pub namespace: Option<Value>,
    /// Names of providers this one links to, in insertion order
    pub linked_providers: Vec<String>,
    /// Per-field update metadata, keyed by admin field name
    pub metadata: BTreeMap<String, ResourceMetadata>,
}

impl AdminService {
    /// Whether no admin field has ever been populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.friendly_name.is_none()
            && self.description.is_none()
            && self.model_name.is_none()
            && self.namespace.is_none()
            && self.linked_providers.is_empty()
            && self.metadata.is_empty()
    }

    /// Read an admin field by name, if set.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match name {
            "friendlyName" => self.friendly_name.as_ref(),
            "description" => self.description.as_ref(),
            "modelUri" => self.model_name.as_ref(),
            _ => None,
        }
    }
}

/// Canonical name of the admin service.
pub const ADMIN_SERVICE: &str = "admin";

/// A live instance of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Unique provider name, sanitized
    pub name: String,
    /// Display name of the model the provider instantiates
    pub model_name: String,
    /// Namespace URI of the model
    pub namespace: String,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// The built-in admin service
    pub admin: AdminService,
    /// Data services keyed by field name; the admin service is not in here
    pub services: BTreeMap<String, ServiceSlot>,
}

impl Provider {
    /// Create an empty instance of the given model with a populated admin
    /// service.
    #[must_use]
    pub fn new(
        name: &str,
        namespace: &str,
        model_name: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut admin = AdminService {
            friendly_name: Some(Value::String(name.to_string())),
            model_name: Some(Value::String(model_name.to_string())),
            namespace: Some(Value::String(namespace.to_string())),
            ..AdminService::default()
        };
        for field in ["friendlyName", "modelUri"] {
            admin
                .metadata
                .insert(field.to_string(), ResourceMetadata::stamped(timestamp, None));
        }
        Self {
            name: name.to_string(),
            model_name: model_name.to_string(),
            namespace: namespace.to_string(),
            created_at: timestamp,
            admin,
            services: BTreeMap::new(),
        }
    }

    /// An instance carrying only identity, used as merge input.
    #[must_use]
    pub fn bare(name: &str, namespace: &str, model_name: &str) -> Self {
        Self {
            name: name.to_string(),
            model_name: model_name.to_string(),
            namespace: namespace.to_string(),
            created_at: Utc::now(),
            admin: AdminService::default(),
            services: BTreeMap::new(),
        }
    }

    /// The `namespace:model` identity string used in mismatch diagnostics.
    #[must_use]
    pub fn model_identity(&self) -> String {
        if self.namespace == DEFAULT_NAMESPACE {
            self.model_name.clone()
        } else {
            format!("{}:{}", self.namespace, self.model_name)
        }
    }

    /// Look up a service slot by field name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceSlot> {
        self.services.get(name)
    }

    /// Mutable service slot lookup.
    pub fn service_mut(&mut self, name: &str) -> Option<&mut ServiceSlot> {
        self.services.get_mut(name)
    }

    /// Read one resource slot.
    #[must_use]
    pub fn resource(&self, service: &str, resource: &str) -> Option<&ResourceSlot> {
        self.services
            .get(service)
            .and_then(|slot| slot.instance.resources.get(resource))
    }

    /// Get or create the resource slot under a service, creating the service
    /// slot itself with the given origin if absent. Returns whether the
    /// service slot was created.
    pub fn resource_entry(
        &mut self,
        service: &str,
        origin: ServiceOrigin,
        resource: &str,
    ) -> (bool, &mut ResourceSlot) {
        let service_created = !self.services.contains_key(service);
        let slot = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| ServiceSlot::new(origin));
        (
            service_created,
            slot.instance
                .resources
                .entry(resource.to_string())
                .or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_provider_has_stamped_admin() {
        let ts = Utc::now();
        let provider = Provider::new("sensor1", DEFAULT_NAMESPACE, "Temp", ts);
        assert_eq!(provider.admin.friendly_name, Some(json!("sensor1")));
        assert_eq!(provider.admin.model_name, Some(json!("Temp")));
        assert_eq!(
            provider.admin.metadata.get("friendlyName").unwrap().timestamp,
            Some(ts)
        );
        assert!(provider.services.is_empty());
    }

    #[test]
    fn bare_provider_admin_is_empty() {
        let provider = Provider::bare("sensor1", DEFAULT_NAMESPACE, "Temp");
        assert!(provider.admin.is_empty());
    }

    #[test]
    fn model_identity_elides_default_namespace() {
        let a = Provider::bare("p", DEFAULT_NAMESPACE, "Temp");
        assert_eq!(a.model_identity(), "Temp");
        let b = Provider::bare("p", "urn:test", "Temp");
        assert_eq!(b.model_identity(), "urn:test:Temp");
    }

    #[test]
    fn resource_entry_reports_service_creation() {
        let mut provider = Provider::new("p", DEFAULT_NAMESPACE, "Temp", Utc::now());
        let (created, _) = provider.resource_entry("sensor", ServiceOrigin::Declared, "value");
        assert!(created);
        let (created, _) = provider.resource_entry("sensor", ServiceOrigin::Declared, "other");
        assert!(!created);
    }

    #[test]
    fn snapshot_is_a_deep_copy() {
        let mut provider = Provider::new("p", DEFAULT_NAMESPACE, "Temp", Utc::now());
        let snapshot = provider.clone();
        let (_, slot) = provider.resource_entry("sensor", ServiceOrigin::Declared, "value");
        slot.value = Some(json!(21.5));
        assert!(snapshot.service("sensor").is_none());
    }
}
