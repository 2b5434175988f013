//! The Model Nexus: registry, instance store, update engine and link graph
//! behind one mutating facade.
//!
//! All mutating calls take the transaction's [`NotificationAccumulator`];
//! the caller flushes it once the operation (or batch) is done. The Nexus
//! itself holds no locks: one logical writer drives it, typically an mpsc
//! command loop.

use crate::error::NexusError;
use crate::merge::{CompareAndSet, StructuralDiff};
use crate::metadata::{MetadataValue, ResourceMetadata};
use crate::naming;
use crate::notification::NotificationAccumulator;
use crate::provider::{Provider, ServiceOrigin};
use crate::schema::{ResourceCapabilities, SchemaRegistry, DEFAULT_NAMESPACE};
use crate::value::{coerce, TimedValue, ValueType};
use crate::whiteboard::{ExternalValue, Whiteboard, WhiteboardFuture};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Admin field recording the forward link list.
const LINKED_PROVIDERS: &str = "linkedProviders";

/// Result of a gated data update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update passed the conflict gate and was stored
    Applied,
    /// The update lost against newer stored state and was dropped
    Stale,
}

/// Schema registry, instance store, update engine and link graph of one
/// gateway.
pub struct ModelNexus {
    schema: SchemaRegistry,
    providers: HashMap<String, Provider>,
    reverse_links: HashMap<String, BTreeSet<String>>,
    whiteboard: Whiteboard,
    merge: Box<dyn CompareAndSet>,
}

impl std::fmt::Debug for ModelNexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelNexus")
            .field("providers", &self.providers.len())
            .field("whiteboard", &self.whiteboard)
            .finish_non_exhaustive()
    }
}

impl Default for ModelNexus {
    fn default() -> Self {
        Self::new(Box::new(StructuralDiff))
    }
}

impl ModelNexus {
    /// A Nexus with the given reconciliation strategy.
    #[must_use]
    pub fn new(merge: Box<dyn CompareAndSet>) -> Self {
        Self {
            schema: SchemaRegistry::new(),
            providers: HashMap::new(),
            reverse_links: HashMap::new(),
            whiteboard: Whiteboard::new(),
            merge,
        }
    }

    /// Read access to the schema registry.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Mutable access to the schema registry, for structural commands.
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.schema
    }

    /// Read access to the whiteboard.
    #[must_use]
    pub fn whiteboard(&self) -> &Whiteboard {
        &self.whiteboard
    }

    /// Mutable access to the whiteboard, for handler registration.
    pub fn whiteboard_mut(&mut self) -> &mut Whiteboard {
        &mut self.whiteboard
    }

    /// Instantiate a provider of a registered model.
    ///
    /// Returns a snapshot of the created instance. Admin fields are stamped
    /// with the given timestamp.
    ///
    /// # Errors
    ///
    /// [`NexusError::ModelNotFound`] for an unknown model;
    /// [`NexusError::ProviderExists`] if the id is bound to a provider of
    /// this model, [`NexusError::ProviderExistsWithDifferentModel`] if it is
    /// bound to a provider of another model.
    pub fn create_provider_instance(
        &mut self,
        namespace: Option<&str>,
        model: &str,
        id: &str,
        timestamp: DateTime<Utc>,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<Provider, NexusError> {
        let uri = namespace.unwrap_or(DEFAULT_NAMESPACE);
        if !self.schema.registered(uri, model) {
            return Err(NexusError::ModelNotFound {
                namespace: uri.to_string(),
                name: model.to_string(),
            });
        }
        let name = naming::sanitize(id)?;
        if let Some(existing) = self.providers.get(&name) {
            let bound = existing.model_identity();
            return if existing.namespace == uri && existing.model_name == model {
                Err(NexusError::ProviderExists {
                    provider: name,
                    model: bound,
                })
            } else {
                Err(NexusError::ProviderExistsWithDifferentModel {
                    provider: name,
                    model: bound,
                })
            };
        }
        let provider = Provider::new(&name, uri, model, timestamp);
        accumulator.add_provider(model, &name)?;
        self.providers.insert(name, provider.clone());
        Ok(provider)
    }

    /// A deep-copied snapshot of a provider, if it exists.
    #[must_use]
    pub fn get_provider(&self, name: &str) -> Option<Provider> {
        self.providers.get(name).cloned()
    }

    /// A snapshot of a provider, checked against an expected model identity.
    #[must_use]
    pub fn get_provider_of(&self, namespace: &str, model: &str, name: &str) -> Option<Provider> {
        self.providers
            .get(name)
            .filter(|p| p.namespace == namespace && p.model_name == model)
            .cloned()
    }

    /// The model a provider instantiates, as a (namespace, model) pair.
    #[must_use]
    pub fn provider_model(&self, name: &str) -> Option<(String, String)> {
        self.providers
            .get(name)
            .map(|p| (p.namespace.clone(), p.model_name.clone()))
    }

    /// Names of all providers, sorted.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all providers instantiating the given model.
    #[must_use]
    pub fn providers_of_model(&self, namespace: &str, model: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .values()
            .filter(|p| p.namespace == namespace && p.model_name == model)
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Apply one timestamped southbound value update.
    ///
    /// Structure is created on demand: an unregistered model is registered,
    /// a missing provider instantiated, a missing service declared (or, on
    /// a dynamic model, added ad hoc) and a missing resource defined with a
    /// type inferred from the value. The update then passes the per-resource
    /// last-writer-wins gate; losing it returns
    /// [`UpdateOutcome::Stale`] without an error or any event.
    ///
    /// # Errors
    ///
    /// Name and coercion failures, plus [`NexusError::ModelMismatch`] when
    /// the provider id is bound to another model.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_data_update(
        &mut self,
        namespace: Option<&str>,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        value: Value,
        timestamp: Option<DateTime<Utc>>,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<UpdateOutcome, NexusError> {
        let uri = namespace.unwrap_or(DEFAULT_NAMESPACE).to_string();
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let provider_name = naming::sanitize(provider)?;
        let service_name = naming::sanitize(service)?;
        let resource_name = naming::sanitize(resource)?;

        if !self.schema.registered(&uri, model) {
            self.schema.create_model(Some(&uri), model, timestamp)?;
        }
        if let Some(existing) = self.providers.get(&provider_name) {
            if existing.namespace != uri || existing.model_name != model {
                return Err(NexusError::ModelMismatch {
                    provider: provider_name,
                    stored: existing.model_identity(),
                    incoming: model.to_string(),
                });
            }
        }

        // Resolve or mint the structural definition before touching values.
        let descriptor = self
            .schema
            .get_model(&uri, model)
            .ok_or_else(|| NexusError::ModelNotFound {
                namespace: uri.clone(),
                name: model.to_string(),
            })?;
        let origin = if descriptor.declares(&service_name) {
            ServiceOrigin::Declared
        } else if descriptor.dynamic {
            ServiceOrigin::Dynamic
        } else {
            self.schema
                .create_service(&uri, model, &service_name, &service_name, timestamp)?;
            ServiceOrigin::Declared
        };
        let declared_type = if origin == ServiceOrigin::Declared {
            let type_name = self
                .schema
                .get_model(&uri, model)
                .and_then(|d| d.service(&service_name))
                .map(|decl| decl.type_name.clone())
                .ok_or_else(|| NexusError::ServiceNotFound {
                    provider: provider_name.clone(),
                    service: service_name.clone(),
                })?;
            let defined = self
                .schema
                .namespace(&uri)
                .and_then(|ns| ns.service_type(&type_name))
                .and_then(|ty| ty.resource(&resource_name))
                .map(|def| def.value_type);
            match defined {
                Some(vt) => vt,
                None => {
                    let inferred = ValueType::infer(&value);
                    self.schema.create_resource(
                        &uri,
                        &type_name,
                        resource,
                        inferred,
                        timestamp,
                        None,
                        BTreeMap::new(),
                        ResourceCapabilities::default(),
                    )?;
                    inferred
                }
            }
        } else {
            ValueType::infer(&value)
        };
        let coerced = coerce(&resource_name, value, &declared_type)?;

        let provider_created = !self.providers.contains_key(&provider_name);
        let instance = self
            .providers
            .entry(provider_name.clone())
            .or_insert_with(|| Provider::new(&provider_name, &uri, model, timestamp));
        if provider_created {
            accumulator.add_provider(model, &provider_name)?;
        }
        let (service_created, slot) =
            instance.resource_entry(&service_name, origin, &resource_name);
        if service_created {
            accumulator.add_service(model, &provider_name, &service_name)?;
        }

        if let Some(metadata) = &slot.metadata {
            if !metadata.allows_update(timestamp) {
                tracing::debug!(
                    provider = %provider_name,
                    service = %service_name,
                    resource = %resource_name,
                    "dropping stale update"
                );
                return Ok(UpdateOutcome::Stale);
            }
        }

        let was_set = slot.value.is_some();
        let old_value = slot.value.replace(coerced.clone());
        let old_map = slot
            .metadata
            .as_ref()
            .map(|m| m.to_map(old_value.as_ref()))
            .unwrap_or_default();
        let original_name = (resource != resource_name).then(|| resource.to_string());
        let metadata = slot
            .metadata
            .get_or_insert_with(|| ResourceMetadata::stamped(timestamp, original_name));
        metadata.timestamp = Some(timestamp);
        let new_map = metadata.to_map(Some(&coerced));

        if !was_set {
            accumulator.add_resource(
                model,
                &provider_name,
                &service_name,
                &resource_name,
                Some(coerced.clone()),
            )?;
        }
        accumulator.resource_value_update(
            model,
            &provider_name,
            &service_name,
            &resource_name,
            old_value,
            Some(coerced),
            timestamp,
        )?;
        accumulator.metadata_value_update(
            model,
            &provider_name,
            &service_name,
            &resource_name,
            old_map,
            new_map,
            timestamp,
        )?;
        Ok(UpdateOutcome::Applied)
    }

    /// The current timestamped value of a resource.
    ///
    /// # Errors
    ///
    /// Not-found errors for each missing path segment.
    pub fn get_resource_value(
        &self,
        provider: &str,
        service: &str,
        resource: &str,
    ) -> Result<TimedValue, NexusError> {
        let slot = self.require_resource(provider, service, resource)?;
        Ok(TimedValue {
            value: slot.value.clone(),
            timestamp: slot.timestamp(),
        })
    }

    /// Store or overwrite a single named metadata entry, unconditionally.
    ///
    /// Unlike value updates there is no timestamp gate on this path, but the
    /// timestamp itself is mandatory.
    ///
    /// # Errors
    ///
    /// [`NexusError::EmptyMetadataKey`] / [`NexusError::InvalidTimestamp`]
    /// for missing arguments, not-found errors for the resource path.
    #[allow(clippy::too_many_arguments)]
    pub fn set_resource_metadata(
        &mut self,
        provider: &str,
        service: &str,
        resource: &str,
        key: &str,
        value: Value,
        timestamp: Option<DateTime<Utc>>,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<(), NexusError> {
        if key.trim().is_empty() {
            return Err(NexusError::EmptyMetadataKey);
        }
        let timestamp = timestamp.ok_or(NexusError::InvalidTimestamp)?;
        let model = self
            .providers
            .get(provider)
            .ok_or_else(|| NexusError::ProviderNotFound(provider.to_string()))?
            .model_name
            .clone();
        let slot = self.require_resource_mut(provider, service, resource)?;
        let value_ref = slot.value.clone();
        let mut updated = slot
            .metadata
            .clone()
            .unwrap_or_else(|| ResourceMetadata::stamped(timestamp, None));
        let old_map = updated.to_map(value_ref.as_ref());
        updated
            .extra
            .insert(key.to_string(), MetadataValue::new(value, Some(timestamp)));
        let new_map = updated.to_map(value_ref.as_ref());
        // Record before storing so a rejected event leaves the slot untouched.
        accumulator.metadata_value_update(
            &model, provider, service, resource, old_map, new_map, timestamp,
        )?;
        slot.metadata = Some(updated);
        Ok(())
    }

    /// Read a single named metadata entry.
    ///
    /// `Ok(None)` means the resource exists but carries no such entry,
    /// distinct from the error for a missing resource.
    ///
    /// # Errors
    ///
    /// Not-found errors for each missing path segment.
    pub fn get_resource_metadata(
        &self,
        provider: &str,
        service: &str,
        resource: &str,
        key: &str,
    ) -> Result<Option<MetadataValue>, NexusError> {
        let slot = self.require_resource(provider, service, resource)?;
        Ok(slot
            .metadata
            .as_ref()
            .and_then(|m| m.extra.get(key))
            .cloned())
    }

    /// The full metadata map of a resource, flattened for observers.
    ///
    /// # Errors
    ///
    /// Not-found errors for each missing path segment.
    pub fn get_resource_metadata_map(
        &self,
        provider: &str,
        service: &str,
        resource: &str,
    ) -> Result<BTreeMap<String, Value>, NexusError> {
        let slot = self.require_resource(provider, service, resource)?;
        Ok(slot
            .metadata
            .as_ref()
            .map(|m| m.to_map(slot.value.as_ref()))
            .unwrap_or_default())
    }

    /// Add a directed link from `parent` to `child`.
    ///
    /// Gated by the last-writer-wins comparison on the parent's link-list
    /// timestamp, without the 1ms tolerance of value updates; a losing call
    /// is a silent no-op. Emits the parent's complete resulting forward
    /// list on acceptance.
    ///
    /// # Errors
    ///
    /// [`NexusError::ProviderNotFound`] if either end does not exist.
    pub fn link_providers(
        &mut self,
        parent: &str,
        child: &str,
        timestamp: Option<DateTime<Utc>>,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<UpdateOutcome, NexusError> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        if !self.providers.contains_key(child) {
            return Err(NexusError::ProviderNotFound(child.to_string()));
        }
        let instance = self
            .providers
            .get_mut(parent)
            .ok_or_else(|| NexusError::ProviderNotFound(parent.to_string()))?;
        let accepted = instance
            .admin
            .metadata
            .get(LINKED_PROVIDERS)
            .map_or(true, |m| m.allows_link_update(timestamp));
        if !accepted {
            return Ok(UpdateOutcome::Stale);
        }
        if !instance.admin.linked_providers.iter().any(|c| c == child) {
            instance.admin.linked_providers.push(child.to_string());
        }
        instance
            .admin
            .metadata
            .insert(LINKED_PROVIDERS.to_string(), ResourceMetadata::stamped(timestamp, None));
        let list = instance.admin.linked_providers.clone();
        self.reverse_links
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        accumulator.link(parent, child, list, timestamp)?;
        Ok(UpdateOutcome::Applied)
    }

    /// Remove the directed link from `parent` to `child`.
    ///
    /// Silently no-ops when the edge is absent; emits the resulting forward
    /// list on success. Same gate as [`Self::link_providers`].
    ///
    /// # Errors
    ///
    /// [`NexusError::ProviderNotFound`] if either end does not exist.
    pub fn unlink_providers(
        &mut self,
        parent: &str,
        child: &str,
        timestamp: Option<DateTime<Utc>>,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<UpdateOutcome, NexusError> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        if !self.providers.contains_key(child) {
            return Err(NexusError::ProviderNotFound(child.to_string()));
        }
        let instance = self
            .providers
            .get_mut(parent)
            .ok_or_else(|| NexusError::ProviderNotFound(parent.to_string()))?;
        if !instance.admin.linked_providers.iter().any(|c| c == child) {
            return Ok(UpdateOutcome::Applied);
        }
        let accepted = instance
            .admin
            .metadata
            .get(LINKED_PROVIDERS)
            .map_or(true, |m| m.allows_link_update(timestamp));
        if !accepted {
            return Ok(UpdateOutcome::Stale);
        }
        instance.admin.linked_providers.retain(|c| c != child);
        instance
            .admin
            .metadata
            .insert(LINKED_PROVIDERS.to_string(), ResourceMetadata::stamped(timestamp, None));
        let list = instance.admin.linked_providers.clone();
        if let Some(parents) = self.reverse_links.get_mut(child) {
            parents.remove(parent);
            if parents.is_empty() {
                self.reverse_links.remove(child);
            }
        }
        accumulator.unlink(parent, child, list, timestamp)?;
        Ok(UpdateOutcome::Applied)
    }

    /// The forward link list of a provider.
    ///
    /// # Errors
    ///
    /// [`NexusError::ProviderNotFound`] for an unknown provider.
    pub fn linked_providers(&self, name: &str) -> Result<Vec<String>, NexusError> {
        self.providers
            .get(name)
            .map(|p| p.admin.linked_providers.clone())
            .ok_or_else(|| NexusError::ProviderNotFound(name.to_string()))
    }

    /// Delete a provider instance, keeping the link graph consistent.
    ///
    /// Cascade order: unlink from every parent in the reverse index, purge
    /// the provider from forward bookkeeping of its children, then drop the
    /// instance. A model identity mismatch is logged and ignored rather
    /// than failed, since the caller is describing an instance that does
    /// not exist.
    ///
    /// # Errors
    ///
    /// [`NexusError::ProviderNotFound`] for an unknown provider.
    pub fn delete_provider(
        &mut self,
        namespace: Option<&str>,
        model: &str,
        name: &str,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<(), NexusError> {
        let uri = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let stored = self
            .providers
            .get(name)
            .ok_or_else(|| NexusError::ProviderNotFound(name.to_string()))?;
        if stored.namespace != uri || stored.model_name != model {
            tracing::warn!(
                provider = name,
                stored = %stored.model_identity(),
                requested = model,
                "delete request names a different model, ignoring"
            );
            return Ok(());
        }
        let timestamp = Utc::now();

        if let Some(parents) = self.reverse_links.remove(name) {
            for parent in parents {
                if let Some(instance) = self.providers.get_mut(&parent) {
                    instance.admin.linked_providers.retain(|c| c != name);
                    accumulator.unlink(
                        &parent,
                        name,
                        instance.admin.linked_providers.clone(),
                        timestamp,
                    )?;
                }
            }
        }

        let instance = self
            .providers
            .remove(name)
            .ok_or_else(|| NexusError::ProviderNotFound(name.to_string()))?;
        for child in &instance.admin.linked_providers {
            if let Some(parents) = self.reverse_links.get_mut(child) {
                parents.remove(name);
                if parents.is_empty() {
                    self.reverse_links.remove(child);
                }
            }
        }

        for (service, slot) in &instance.services {
            for (resource, resource_slot) in &slot.instance.resources {
                if resource_slot.value.is_some() {
                    accumulator.remove_resource(model, name, service, resource)?;
                }
            }
            accumulator.remove_service(model, name, service)?;
        }
        accumulator.remove_provider(model, name)?;
        Ok(())
    }

    /// Delete a model and cascade to all of its provider instances.
    ///
    /// # Errors
    ///
    /// [`NexusError::ModelNotFound`] for an unknown model.
    pub fn delete_model(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<(), NexusError> {
        let uri = namespace.unwrap_or(DEFAULT_NAMESPACE).to_string();
        if !self.schema.registered(&uri, name) {
            return Err(NexusError::ModelNotFound {
                namespace: uri,
                name: name.to_string(),
            });
        }
        for provider in self.providers_of_model(&uri, name) {
            self.delete_provider(Some(&uri), name, &provider, accumulator)?;
        }
        self.schema.remove_model(&uri, name)?;
        Ok(())
    }

    /// Reconcile a detached provider graph into the store.
    ///
    /// An unknown model is registered on the fly; an unknown provider id is
    /// a create, with a stamped admin structure only when the incoming graph
    /// carries none. Reconciliation is delegated to the injected
    /// [`CompareAndSet`] strategy. Returns a defensive deep copy of the
    /// merged stored instance.
    ///
    /// # Errors
    ///
    /// [`NexusError::ModelMismatch`] when the id is bound to another model,
    /// [`NexusError::DynamicServiceCollision`] when an ad hoc service name
    /// collides with a declared slot of the model.
    pub fn save(
        &mut self,
        incoming: Provider,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<Provider, NexusError> {
        let name = naming::sanitize(&incoming.name)?;
        let uri = incoming.namespace.clone();
        let model = incoming.model_name.clone();
        if !self.schema.registered(&uri, &model) {
            self.schema.create_model(Some(&uri), &model, Utc::now())?;
        }
        let descriptor = self
            .schema
            .get_model(&uri, &model)
            .ok_or_else(|| NexusError::ModelNotFound {
                namespace: uri.clone(),
                name: model.clone(),
            })?;
        for (service, slot) in &incoming.services {
            if slot.origin == ServiceOrigin::Dynamic && descriptor.declares(service) {
                return Err(NexusError::DynamicServiceCollision {
                    model: model.clone(),
                    service: service.clone(),
                });
            }
        }

        if let Some(stored) = self.providers.get_mut(&name) {
            if stored.namespace != uri || stored.model_name != model {
                return Err(NexusError::ModelMismatch {
                    provider: name,
                    stored: stored.model_identity(),
                    incoming: model,
                });
            }
            self.merge.compare_and_set(&incoming, stored, accumulator)?;
            return Ok(stored.clone());
        }

        accumulator.add_provider(&model, &name)?;
        let mut stored = if incoming.admin.is_empty() {
            Provider::new(&name, &uri, &model, Utc::now())
        } else {
            Provider::bare(&name, &uri, &model)
        };
        self.merge.compare_and_set(&incoming, &mut stored, accumulator)?;
        let snapshot = stored.clone();
        self.providers.insert(name, stored);
        Ok(snapshot)
    }

    /// Invoke an action resource through the whiteboard.
    ///
    /// The returned future resolves to the handler's result; a missing
    /// handler yields an immediately failed future. The invocation event is
    /// recorded regardless of the eventual outcome.
    ///
    /// # Errors
    ///
    /// [`NexusError::ProviderNotFound`] for an unknown provider.
    pub fn act_resource(
        &mut self,
        provider: &str,
        service: &str,
        resource: &str,
        arguments: BTreeMap<String, Value>,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<WhiteboardFuture<Value>, NexusError> {
        let model = self
            .providers
            .get(provider)
            .ok_or_else(|| NexusError::ProviderNotFound(provider.to_string()))?
            .model_name
            .clone();
        accumulator.resource_action(&model, provider, service, resource, Utc::now())?;
        Ok(self
            .whiteboard
            .act(&model, provider, service, resource, arguments))
    }

    /// Request the device-side value of an externally readable resource.
    ///
    /// The store is not touched; the caller applies the completed value as
    /// an ordinary timestamped update.
    ///
    /// # Errors
    ///
    /// [`NexusError::ProviderNotFound`] for an unknown provider.
    pub fn pull_value(
        &self,
        provider: &str,
        service: &str,
        resource: &str,
    ) -> Result<WhiteboardFuture<ExternalValue>, NexusError> {
        let instance = self
            .providers
            .get(provider)
            .ok_or_else(|| NexusError::ProviderNotFound(provider.to_string()))?;
        let cached = instance
            .resource(service, resource)
            .and_then(|slot| slot.value.clone());
        Ok(self
            .whiteboard
            .pull(&instance.model_name, provider, service, resource, cached))
    }

    /// Forward a value to an externally writable resource.
    ///
    /// As with [`Self::pull_value`], the store only changes when the caller
    /// feeds the completed result back as an update.
    ///
    /// # Errors
    ///
    /// [`NexusError::ProviderNotFound`] for an unknown provider.
    pub fn push_value(
        &self,
        provider: &str,
        service: &str,
        resource: &str,
        value: Option<Value>,
    ) -> Result<WhiteboardFuture<ExternalValue>, NexusError> {
        let instance = self
            .providers
            .get(provider)
            .ok_or_else(|| NexusError::ProviderNotFound(provider.to_string()))?;
        Ok(self
            .whiteboard
            .push(&instance.model_name, provider, service, resource, value))
    }

    fn require_resource(
        &self,
        provider: &str,
        service: &str,
        resource: &str,
    ) -> Result<&crate::provider::ResourceSlot, NexusError> {
        let instance = self
            .providers
            .get(provider)
            .ok_or_else(|| NexusError::ProviderNotFound(provider.to_string()))?;
        let slot = instance
            .service(service)
            .ok_or_else(|| NexusError::ServiceNotFound {
                provider: provider.to_string(),
                service: service.to_string(),
            })?;
        slot.instance
            .resources
            .get(resource)
            .ok_or_else(|| NexusError::ResourceNotFound {
                service: service.to_string(),
                resource: resource.to_string(),
            })
    }

    fn require_resource_mut(
        &mut self,
        provider: &str,
        service: &str,
        resource: &str,
    ) -> Result<&mut crate::provider::ResourceSlot, NexusError> {
        let instance = self
            .providers
            .get_mut(provider)
            .ok_or_else(|| NexusError::ProviderNotFound(provider.to_string()))?;
        let slot = instance
            .service_mut(service)
            .ok_or_else(|| NexusError::ServiceNotFound {
                provider: provider.to_string(),
                service: service.to_string(),
            })?;
        slot.instance
            .resources
            .get_mut(resource)
            .ok_or_else(|| NexusError::ResourceNotFound {
                service: service.to_string(),
                resource: resource.to_string(),
            })
    }
}
