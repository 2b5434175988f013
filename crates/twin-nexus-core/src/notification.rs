//! Typed change notifications and the per-transaction accumulator.
//!
//! Every mutating Nexus operation records its effects into a
//! [`NotificationAccumulator`]. Nothing is delivered while the operation
//! runs; on [`NotificationAccumulator::complete`] the batch is debounced and
//! flushed to the sink in a deterministic order. Callers observing the sink
//! therefore only ever see the net effect of a whole operation.

use crate::error::NexusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Phase of a provider, service or resource lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    /// A provider appeared
    ProviderCreated,
    /// A provider disappeared
    ProviderDeleted,
    /// A service appeared on a provider
    ServiceCreated,
    /// A service disappeared from a provider
    ServiceDeleted,
    /// A resource carries a value for the first time
    ResourceCreated,
    /// A resource's value was removed
    ResourceDeleted,
}

impl LifecycleStatus {
    fn is_created(self) -> bool {
        matches!(
            self,
            Self::ProviderCreated | Self::ServiceCreated | Self::ResourceCreated
        )
    }
}

/// A structural appearance or disappearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleNotification {
    /// What happened
    pub status: LifecycleStatus,
    /// Display name of the model
    pub model: String,
    /// Provider name
    pub provider: String,
    /// Service field name, for service and resource events
    pub service: Option<String>,
    /// Resource name, for resource events
    pub resource: Option<String>,
    /// Initial value carried by a resource-created event
    pub initial_value: Option<Value>,
}

/// A resource value change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDataNotification {
    /// Display name of the model
    pub model: String,
    /// Provider name
    pub provider: String,
    /// Service field name
    pub service: String,
    /// Resource name
    pub resource: String,
    /// Value before the change
    pub old_value: Option<Value>,
    /// Value after the change
    pub new_value: Option<Value>,
    /// Timestamp of the accepted update
    pub timestamp: DateTime<Utc>,
}

/// A resource metadata change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadataNotification {
    /// Display name of the model
    pub model: String,
    /// Provider name
    pub provider: String,
    /// Service field name
    pub service: String,
    /// Resource name
    pub resource: String,
    /// Metadata map before the change
    pub old_values: BTreeMap<String, Value>,
    /// Metadata map after the change
    pub new_values: BTreeMap<String, Value>,
    /// Timestamp of the accepted update
    pub timestamp: DateTime<Utc>,
}

/// An action resource invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceActionNotification {
    /// Display name of the model
    pub model: String,
    /// Provider name
    pub provider: String,
    /// Service field name
    pub service: String,
    /// Action name
    pub resource: String,
    /// When the action was invoked
    pub timestamp: DateTime<Utc>,
}

/// A change to a provider's outgoing link list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkNotification {
    /// Provider owning the link list
    pub provider: String,
    /// The linked or unlinked provider
    pub other: String,
    /// The full forward link list after the change
    pub linked_providers: Vec<String>,
    /// Timestamp of the accepted change
    pub timestamp: DateTime<Utc>,
}

/// Any notification the Nexus can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// Structural lifecycle event
    Lifecycle(LifecycleNotification),
    /// Resource value change
    Data(ResourceDataNotification),
    /// Resource metadata change
    Metadata(ResourceMetadataNotification),
    /// Action invocation
    Action(ResourceActionNotification),
    /// Provider linked
    Linked(LinkNotification),
    /// Provider unlinked
    Unlinked(LinkNotification),
}

/// Receives completed notification batches.
pub trait NotificationSink: Send {
    /// Deliver one debounced notification.
    fn deliver(&self, notification: Notification);
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn deliver(&self, _notification: Notification) {}
}

/// Event family, in flush order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum KeyKind {
    ProviderLifecycle,
    ServiceLifecycle,
    ResourceLifecycle,
    Data,
    Metadata,
    Action,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct NotificationKey {
    kind: KeyKind,
    provider: String,
    service: String,
    resource: String,
}

impl NotificationKey {
    fn provider(kind: KeyKind, provider: &str) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            service: String::new(),
            resource: String::new(),
        }
    }

    fn service(kind: KeyKind, provider: &str, service: &str) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            service: service.to_string(),
            resource: String::new(),
        }
    }

    fn resource(kind: KeyKind, provider: &str, service: &str, resource: &str) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            service: service.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// Collects and debounces the notifications of one mutating operation.
///
/// Per (kind, provider, service, resource) key:
/// - a created event followed by a deleted event annihilates, nothing is
///   flushed for the key;
/// - a deleted event followed by a created event keeps both, in that order;
/// - repeated value or metadata updates collapse into one event carrying the
///   first old state and the last new state;
/// - a value or metadata update whose timestamp precedes the pending one is
///   rejected as out of order;
/// - action events accumulate and flush sorted by timestamp.
#[derive(Debug)]
pub struct NotificationAccumulator {
    pending: BTreeMap<NotificationKey, Vec<Notification>>,
    completed: bool,
}

impl Default for NotificationAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationAccumulator {
    /// An empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            completed: false,
        }
    }

    fn check_open(&self) -> Result<(), NexusError> {
        if self.completed {
            return Err(NexusError::AccumulatorCompleted);
        }
        Ok(())
    }

    /// Record a provider appearing.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn add_provider(&mut self, model: &str, provider: &str) -> Result<(), NexusError> {
        self.lifecycle(
            NotificationKey::provider(KeyKind::ProviderLifecycle, provider),
            LifecycleNotification {
                status: LifecycleStatus::ProviderCreated,
                model: model.to_string(),
                provider: provider.to_string(),
                service: None,
                resource: None,
                initial_value: None,
            },
        )
    }

    /// Record a provider disappearing.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn remove_provider(&mut self, model: &str, provider: &str) -> Result<(), NexusError> {
        self.lifecycle(
            NotificationKey::provider(KeyKind::ProviderLifecycle, provider),
            LifecycleNotification {
                status: LifecycleStatus::ProviderDeleted,
                model: model.to_string(),
                provider: provider.to_string(),
                service: None,
                resource: None,
                initial_value: None,
            },
        )
    }

    /// Record a service appearing on a provider.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn add_service(
        &mut self,
        model: &str,
        provider: &str,
        service: &str,
    ) -> Result<(), NexusError> {
        self.lifecycle(
            NotificationKey::service(KeyKind::ServiceLifecycle, provider, service),
            LifecycleNotification {
                status: LifecycleStatus::ServiceCreated,
                model: model.to_string(),
                provider: provider.to_string(),
                service: Some(service.to_string()),
                resource: None,
                initial_value: None,
            },
        )
    }

    /// Record a service disappearing from a provider.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn remove_service(
        &mut self,
        model: &str,
        provider: &str,
        service: &str,
    ) -> Result<(), NexusError> {
        self.lifecycle(
            NotificationKey::service(KeyKind::ServiceLifecycle, provider, service),
            LifecycleNotification {
                status: LifecycleStatus::ServiceDeleted,
                model: model.to_string(),
                provider: provider.to_string(),
                service: Some(service.to_string()),
                resource: None,
                initial_value: None,
            },
        )
    }

    /// Record a resource carrying a value for the first time.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn add_resource(
        &mut self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        initial_value: Option<Value>,
    ) -> Result<(), NexusError> {
        self.lifecycle(
            NotificationKey::resource(KeyKind::ResourceLifecycle, provider, service, resource),
            LifecycleNotification {
                status: LifecycleStatus::ResourceCreated,
                model: model.to_string(),
                provider: provider.to_string(),
                service: Some(service.to_string()),
                resource: Some(resource.to_string()),
                initial_value,
            },
        )
    }

    /// Record a resource's value being removed.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn remove_resource(
        &mut self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
    ) -> Result<(), NexusError> {
        self.lifecycle(
            NotificationKey::resource(KeyKind::ResourceLifecycle, provider, service, resource),
            LifecycleNotification {
                status: LifecycleStatus::ResourceDeleted,
                model: model.to_string(),
                provider: provider.to_string(),
                service: Some(service.to_string()),
                resource: Some(resource.to_string()),
                initial_value: None,
            },
        )
    }

    fn lifecycle(
        &mut self,
        key: NotificationKey,
        notification: LifecycleNotification,
    ) -> Result<(), NexusError> {
        self.check_open()?;
        let pending = self.pending.entry(key).or_default();
        match pending.last() {
            Some(Notification::Lifecycle(last)) if last.status == notification.status => {}
            Some(Notification::Lifecycle(last))
                if last.status.is_created() && !notification.status.is_created() =>
            {
                pending.pop();
            }
            _ => pending.push(Notification::Lifecycle(notification)),
        }
        Ok(())
    }

    /// Record a resource value change.
    ///
    /// # Errors
    ///
    /// [`NexusError::OutOfOrder`] if the timestamp precedes a pending update
    /// of the same resource, [`NexusError::AccumulatorCompleted`] after
    /// [`Self::complete`].
    #[allow(clippy::too_many_arguments)]
    pub fn resource_value_update(
        &mut self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), NexusError> {
        self.check_open()?;
        let key = NotificationKey::resource(KeyKind::Data, provider, service, resource);
        let pending = self.pending.entry(key).or_default();
        if let Some(Notification::Data(existing)) = pending.last_mut() {
            if timestamp < existing.timestamp {
                return Err(NexusError::OutOfOrder("resource value update"));
            }
            existing.new_value = new_value;
            existing.timestamp = timestamp;
            return Ok(());
        }
        pending.push(Notification::Data(ResourceDataNotification {
            model: model.to_string(),
            provider: provider.to_string(),
            service: service.to_string(),
            resource: resource.to_string(),
            old_value,
            new_value,
            timestamp,
        }));
        Ok(())
    }

    /// Record a resource metadata change.
    ///
    /// Metadata writes carry no ordering gate: a pending metadata event for
    /// the same resource is collapsed by replacing its end state and
    /// timestamp unconditionally, keeping the first recorded old state.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    #[allow(clippy::too_many_arguments)]
    pub fn metadata_value_update(
        &mut self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        old_values: BTreeMap<String, Value>,
        new_values: BTreeMap<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), NexusError> {
        self.check_open()?;
        let key = NotificationKey::resource(KeyKind::Metadata, provider, service, resource);
        let pending = self.pending.entry(key).or_default();
        if let Some(Notification::Metadata(existing)) = pending.last_mut() {
            existing.new_values = new_values;
            existing.timestamp = timestamp;
            return Ok(());
        }
        pending.push(Notification::Metadata(ResourceMetadataNotification {
            model: model.to_string(),
            provider: provider.to_string(),
            service: service.to_string(),
            resource: resource.to_string(),
            old_values,
            new_values,
            timestamp,
        }));
        Ok(())
    }

    /// Record an action invocation.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn resource_action(
        &mut self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), NexusError> {
        self.check_open()?;
        let key = NotificationKey::resource(KeyKind::Action, provider, service, resource);
        self.pending
            .entry(key)
            .or_default()
            .push(Notification::Action(ResourceActionNotification {
                model: model.to_string(),
                provider: provider.to_string(),
                service: service.to_string(),
                resource: resource.to_string(),
                timestamp,
            }));
        Ok(())
    }

    /// Record a link being added to a provider's forward list.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn link(
        &mut self,
        provider: &str,
        other: &str,
        linked_providers: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), NexusError> {
        self.check_open()?;
        let key = NotificationKey::service(KeyKind::Link, provider, other);
        self.pending
            .entry(key)
            .or_default()
            .push(Notification::Linked(LinkNotification {
                provider: provider.to_string(),
                other: other.to_string(),
                linked_providers,
                timestamp,
            }));
        Ok(())
    }

    /// Record a link being removed from a provider's forward list.
    ///
    /// # Errors
    ///
    /// [`NexusError::AccumulatorCompleted`] after [`Self::complete`].
    pub fn unlink(
        &mut self,
        provider: &str,
        other: &str,
        linked_providers: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), NexusError> {
        self.check_open()?;
        let key = NotificationKey::service(KeyKind::Link, provider, other);
        self.pending
            .entry(key)
            .or_default()
            .push(Notification::Unlinked(LinkNotification {
                provider: provider.to_string(),
                other: other.to_string(),
                linked_providers,
                timestamp,
            }));
        Ok(())
    }

    /// Flush the debounced batch to the sink and seal the accumulator.
    ///
    /// Events are delivered grouped by kind (provider lifecycle first, then
    /// service and resource lifecycle, data, metadata, actions, links) and
    /// within one key's action backlog sorted by timestamp.
    pub fn complete(&mut self, sink: &dyn NotificationSink) {
        self.completed = true;
        for (key, mut batch) in std::mem::take(&mut self.pending) {
            if key.kind == KeyKind::Action {
                batch.sort_by_key(|n| match n {
                    Notification::Action(a) => a.timestamp,
                    _ => DateTime::<Utc>::MIN_UTC,
                });
            }
            for notification in batch {
                sink.deliver(notification);
            }
        }
    }

    /// Drop all pending notifications without delivering anything.
    pub fn abort(&mut self) {
        self.completed = true;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Notification>>);

    impl NotificationSink for RecordingSink {
        fn deliver(&self, notification: Notification) {
            self.0.lock().unwrap().push(notification);
        }
    }

    impl RecordingSink {
        fn take(&self) -> Vec<Notification> {
            std::mem::take(&mut self.0.lock().unwrap())
        }
    }

    #[test]
    fn create_then_delete_annihilates() {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        acc.add_provider("Temp", "p1").unwrap();
        acc.remove_provider("Temp", "p1").unwrap();
        acc.complete(&sink);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn delete_then_create_keeps_both_in_order() {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        acc.remove_provider("Temp", "p1").unwrap();
        acc.add_provider("Temp", "p1").unwrap();
        acc.complete(&sink);

        let events = sink.take();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            Notification::Lifecycle(l) if l.status == LifecycleStatus::ProviderDeleted
        ));
        assert!(matches!(
            &events[1],
            Notification::Lifecycle(l) if l.status == LifecycleStatus::ProviderCreated
        ));
    }

    #[test]
    fn repeated_lifecycle_events_dedupe() {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        acc.add_service("Temp", "p1", "sensor").unwrap();
        acc.add_service("Temp", "p1", "sensor").unwrap();
        acc.complete(&sink);
        assert_eq!(sink.take().len(), 1);
    }

    #[test]
    fn value_updates_collapse_keeping_endpoints() {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        acc.resource_value_update("Temp", "p1", "s", "v", None, Some(json!(1)), t0)
            .unwrap();
        acc.resource_value_update("Temp", "p1", "s", "v", Some(json!(1)), Some(json!(2)), t1)
            .unwrap();
        acc.complete(&sink);

        let events = sink.take();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Notification::Data(d) => {
                assert_eq!(d.old_value, None);
                assert_eq!(d.new_value, Some(json!(2)));
                assert_eq!(d.timestamp, t1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn metadata_updates_collapse_without_an_ordering_gate() {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        let t0 = Utc::now();
        let earlier = t0 - chrono::Duration::seconds(1);
        let first: BTreeMap<String, Value> =
            [("unit".to_string(), json!("C"))].into_iter().collect();
        let second: BTreeMap<String, Value> =
            [("unit".to_string(), json!("F"))].into_iter().collect();
        acc.metadata_value_update("Temp", "p1", "s", "v", BTreeMap::new(), first.clone(), t0)
            .unwrap();
        // An earlier timestamp still wins on the metadata path.
        acc.metadata_value_update("Temp", "p1", "s", "v", first, second.clone(), earlier)
            .unwrap();
        acc.complete(&sink);

        let events = sink.take();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Notification::Metadata(m) => {
                assert!(m.old_values.is_empty());
                assert_eq!(m.new_values, second);
                assert_eq!(m.timestamp, earlier);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn completed_accumulator_rejects_further_events() {
        let mut acc = NotificationAccumulator::new();
        acc.add_provider("Temp", "p1").unwrap();
        acc.complete(&NullSink);
        let err = acc.add_provider("Temp", "p2").unwrap_err();
        assert!(matches!(err, NexusError::AccumulatorCompleted));
    }

    #[test]
    fn out_of_order_value_update_is_rejected() {
        let mut acc = NotificationAccumulator::new();
        let t0 = Utc::now();
        acc.resource_value_update("Temp", "p1", "s", "v", None, Some(json!(1)), t0)
            .unwrap();
        let err = acc
            .resource_value_update(
                "Temp",
                "p1",
                "s",
                "v",
                Some(json!(1)),
                Some(json!(2)),
                t0 - chrono::Duration::seconds(1),
            )
            .unwrap_err();
        assert!(matches!(err, NexusError::OutOfOrder(_)));
    }

    #[test]
    fn flush_orders_provider_lifecycle_before_data() {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        let t0 = Utc::now();
        acc.resource_value_update("Temp", "p1", "s", "v", None, Some(json!(1)), t0)
            .unwrap();
        acc.add_provider("Temp", "p1").unwrap();
        acc.complete(&sink);

        let events = sink.take();
        assert!(matches!(&events[0], Notification::Lifecycle(_)));
        assert!(matches!(&events[1], Notification::Data(_)));
    }

    #[test]
    fn actions_flush_sorted_by_timestamp() {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        acc.resource_action("Temp", "p1", "s", "act", t1).unwrap();
        acc.resource_action("Temp", "p1", "s", "act", t0).unwrap();
        acc.complete(&sink);

        let events = sink.take();
        let timestamps: Vec<_> = events
            .iter()
            .map(|n| match n {
                Notification::Action(a) => a.timestamp,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(timestamps, vec![t0, t1]);
    }
}
