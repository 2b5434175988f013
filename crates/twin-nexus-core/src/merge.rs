//! Reconciliation of a detached provider graph against the stored one.
//!
//! [`CompareAndSet`] is the boundary `save` delegates to. The default
//! [`StructuralDiff`] strategy walks both graphs field by field and applies
//! the same timestamp gate per leaf that single-resource updates use, so a
//! bulk save and a stream of individual updates converge on the same state.

use crate::error::NexusError;
use crate::metadata::{MetadataValue, ResourceMetadata};
use crate::notification::NotificationAccumulator;
use crate::provider::{Provider, ResourceSlot, ServiceSlot};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;

/// Strategy reconciling an incoming provider graph into the stored one.
pub trait CompareAndSet: Send {
    /// Mutate `stored` towards `incoming`, recording every effective change
    /// into the accumulator.
    ///
    /// # Errors
    ///
    /// Implementations fail only on accumulator misuse; per-leaf conflicts
    /// are resolved silently by the timestamp gate.
    fn compare_and_set(
        &self,
        incoming: &Provider,
        stored: &mut Provider,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<(), NexusError>;
}

/// Field-by-field structural diff with last-writer-wins leaves.
///
/// Rules per resource, incoming timestamp defaulting to now when absent:
/// - equal value and equal timestamp: untouched, nothing emitted;
/// - stored timestamp strictly after `incoming + 1ms`: stale, silently
///   skipped;
/// - first accepted value: "resource added" then the value change;
/// - incoming `null` value: value cleared, "resource removed" emitted;
/// - extra metadata entries merge per key under the same gate, and stored
///   entries absent from a non-empty incoming map are dropped.
///
/// Provider identity, admin `modelUri`/namespace fields and the link list
/// are never merged; links only move through the link graph operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralDiff;

impl CompareAndSet for StructuralDiff {
    fn compare_and_set(
        &self,
        incoming: &Provider,
        stored: &mut Provider,
        accumulator: &mut NotificationAccumulator,
    ) -> Result<(), NexusError> {
        let model = stored.model_name.clone();
        let provider = stored.name.clone();

        merge_admin(incoming, stored, accumulator, &model, &provider)?;

        let names: BTreeSet<String> = stored
            .services
            .keys()
            .chain(incoming.services.keys())
            .cloned()
            .collect();

        for service in names {
            match (incoming.services.get(&service), stored.services.get_mut(&service)) {
                (Some(new_slot), None) => {
                    add_service(stored, accumulator, &model, &provider, &service, new_slot)?;
                }
                (None, Some(_)) => {
                    remove_service(stored, accumulator, &model, &provider, &service)?;
                }
                (Some(new_slot), Some(old_slot)) => {
                    let resources: BTreeSet<String> = old_slot
                        .instance
                        .resources
                        .keys()
                        .chain(new_slot.instance.resources.keys())
                        .cloned()
                        .collect();
                    for resource in resources {
                        let incoming_slot = new_slot.instance.resources.get(&resource);
                        let slot = old_slot
                            .instance
                            .resources
                            .entry(resource.clone())
                            .or_default();
                        merge_resource(
                            slot,
                            incoming_slot,
                            accumulator,
                            &model,
                            &provider,
                            &service,
                            &resource,
                        )?;
                    }
                }
                (None, None) => unreachable!("name came from one of the maps"),
            }
        }
        Ok(())
    }
}

fn merge_admin(
    incoming: &Provider,
    stored: &mut Provider,
    accumulator: &mut NotificationAccumulator,
    model: &str,
    provider: &str,
) -> Result<(), NexusError> {
    let fields: [(&str, Option<&Value>); 2] = [
        ("friendlyName", incoming.admin.friendly_name.as_ref()),
        ("description", incoming.admin.description.as_ref()),
    ];
    for (field, value) in fields {
        let Some(value) = value else { continue };
        let incoming_ts = incoming
            .admin
            .metadata
            .get(field)
            .and_then(|m| m.timestamp)
            .unwrap_or_else(Utc::now);
        let accepted = stored
            .admin
            .metadata
            .get(field)
            .map_or(true, |m| m.allows_update(incoming_ts));
        if !accepted {
            continue;
        }
        let old = match field {
            "friendlyName" => stored.admin.friendly_name.replace(value.clone()),
            _ => stored.admin.description.replace(value.clone()),
        };
        if old.as_ref() == Some(value) {
            continue;
        }
        stored
            .admin
            .metadata
            .insert(field.to_string(), ResourceMetadata::stamped(incoming_ts, None));
        accumulator.resource_value_update(
            model,
            provider,
            "admin",
            field,
            old,
            Some(value.clone()),
            incoming_ts,
        )?;
    }
    Ok(())
}

fn add_service(
    stored: &mut Provider,
    accumulator: &mut NotificationAccumulator,
    model: &str,
    provider: &str,
    service: &str,
    new_slot: &ServiceSlot,
) -> Result<(), NexusError> {
    accumulator.add_service(model, provider, service)?;
    let mut slot = ServiceSlot::new(new_slot.origin);
    for (resource, incoming_slot) in &new_slot.instance.resources {
        let target = slot.instance.resources.entry(resource.clone()).or_default();
        merge_resource(
            target,
            Some(incoming_slot),
            accumulator,
            model,
            provider,
            service,
            resource,
        )?;
    }
    stored.services.insert(service.to_string(), slot);
    Ok(())
}

fn remove_service(
    stored: &mut Provider,
    accumulator: &mut NotificationAccumulator,
    model: &str,
    provider: &str,
    service: &str,
) -> Result<(), NexusError> {
    if let Some(slot) = stored.services.remove(service) {
        let timestamp = Utc::now();
        for (resource, resource_slot) in &slot.instance.resources {
            if resource_slot.value.is_some() {
                accumulator.resource_value_update(
                    model,
                    provider,
                    service,
                    resource,
                    resource_slot.value.clone(),
                    None,
                    timestamp,
                )?;
                accumulator.remove_resource(model, provider, service, resource)?;
            }
        }
        accumulator.remove_service(model, provider, service)?;
    }
    Ok(())
}

fn merge_resource(
    slot: &mut ResourceSlot,
    incoming: Option<&ResourceSlot>,
    accumulator: &mut NotificationAccumulator,
    model: &str,
    provider: &str,
    service: &str,
    resource: &str,
) -> Result<(), NexusError> {
    let Some(incoming) = incoming else {
        // Present in the stored graph only: the save describes the full
        // intended state, so the value is cleared.
        if slot.value.is_some() {
            let timestamp = Utc::now();
            let old = slot.value.take();
            if let Some(metadata) = slot.metadata.as_mut() {
                metadata.timestamp = Some(timestamp);
            }
            accumulator.resource_value_update(
                model, provider, service, resource, old, None, timestamp,
            )?;
            accumulator.remove_resource(model, provider, service, resource)?;
        }
        return Ok(());
    };

    let incoming_ts = incoming
        .metadata
        .as_ref()
        .and_then(|m| m.timestamp)
        .unwrap_or_else(Utc::now);

    if slot.value == incoming.value && slot.timestamp() == Some(incoming_ts) {
        return Ok(());
    }
    let accepted = slot
        .metadata
        .as_ref()
        .map_or(true, |m| m.allows_update(incoming_ts));
    if !accepted {
        return Ok(());
    }

    let was_set = slot.value.is_some();
    let old_value = slot.value.clone();
    let old_map = slot
        .metadata
        .as_ref()
        .map(|m| m.to_map(old_value.as_ref()))
        .unwrap_or_default();

    slot.value = incoming.value.clone();
    let metadata = slot.metadata.get_or_insert_with(|| {
        ResourceMetadata::stamped(
            incoming_ts,
            incoming.metadata.as_ref().and_then(|m| m.original_name.clone()),
        )
    });
    metadata.timestamp = Some(incoming_ts);
    merge_extras(metadata, incoming.metadata.as_ref(), incoming_ts);

    match (&slot.value, was_set) {
        (Some(value), false) => {
            accumulator.add_resource(model, provider, service, resource, Some(value.clone()))?;
        }
        (None, true) => {
            accumulator.remove_resource(model, provider, service, resource)?;
        }
        _ => {}
    }
    if slot.value != old_value {
        accumulator.resource_value_update(
            model,
            provider,
            service,
            resource,
            old_value,
            slot.value.clone(),
            incoming_ts,
        )?;
    }
    let new_map = slot
        .metadata
        .as_ref()
        .map(|m| m.to_map(slot.value.as_ref()))
        .unwrap_or_default();
    if new_map != old_map {
        accumulator.metadata_value_update(
            model, provider, service, resource, old_map, new_map, incoming_ts,
        )?;
    }
    Ok(())
}

fn merge_extras(
    stored: &mut ResourceMetadata,
    incoming: Option<&ResourceMetadata>,
    default_ts: chrono::DateTime<Utc>,
) {
    let Some(incoming) = incoming else { return };
    if incoming.extra.is_empty() {
        return;
    }
    let mut merged = std::collections::BTreeMap::new();
    for (key, entry) in &incoming.extra {
        let entry_ts = entry.timestamp.unwrap_or(default_ts);
        let keep_stored = stored
            .extra
            .get(key)
            .map(|old| !old.allows_overwrite(entry_ts));
        match keep_stored {
            Some(true) => {
                if let Some(old) = stored.extra.get(key) {
                    merged.insert(key.clone(), old.clone());
                }
            }
            _ => {
                merged.insert(
                    key.clone(),
                    MetadataValue {
                        value: entry.value.clone(),
                        timestamp: Some(entry_ts),
                    },
                );
            }
        }
    }
    stored.extra = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{Notification, NotificationSink};
    use crate::provider::ServiceOrigin;
    use crate::schema::DEFAULT_NAMESPACE;
    use chrono::{DateTime, Duration, TimeZone};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Notification>>);

    impl NotificationSink for RecordingSink {
        fn deliver(&self, notification: Notification) {
            self.0.lock().unwrap().push(notification);
        }
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn provider_with(resource_value: Value, at: DateTime<Utc>) -> Provider {
        let mut p = Provider::bare("p1", DEFAULT_NAMESPACE, "Temp");
        let (_, slot) = p.resource_entry("sensor", ServiceOrigin::Declared, "value");
        slot.value = Some(resource_value);
        slot.metadata = Some(ResourceMetadata::stamped(at, None));
        p
    }

    fn run(incoming: &Provider, stored: &mut Provider) -> Vec<Notification> {
        let sink = RecordingSink::default();
        let mut acc = NotificationAccumulator::new();
        StructuralDiff
            .compare_and_set(incoming, stored, &mut acc)
            .unwrap();
        acc.complete(&sink);
        let mut delivered = sink.0.lock().unwrap();
        std::mem::take(&mut *delivered)
    }

    #[test]
    fn first_value_emits_added_then_changed() {
        let mut stored = Provider::new("p1", DEFAULT_NAMESPACE, "Temp", ts(0));
        let incoming = provider_with(json!(21.5), ts(10));

        let events = run(&incoming, &mut stored);
        assert!(events.iter().any(|n| matches!(
            n,
            Notification::Lifecycle(l) if l.resource.as_deref() == Some("value")
        )));
        assert!(events.iter().any(|n| matches!(
            n,
            Notification::Data(d) if d.new_value == Some(json!(21.5))
        )));
        assert_eq!(
            stored.resource("sensor", "value").unwrap().value,
            Some(json!(21.5))
        );
    }

    #[test]
    fn stale_incoming_is_silently_skipped() {
        let mut stored = provider_with(json!(20.0), ts(100));
        let incoming = provider_with(json!(99.0), ts(50));

        let events = run(&incoming, &mut stored);
        assert!(events.is_empty());
        assert_eq!(
            stored.resource("sensor", "value").unwrap().value,
            Some(json!(20.0))
        );
    }

    #[test]
    fn equal_value_and_timestamp_is_untouched() {
        let mut stored = provider_with(json!(20.0), ts(100));
        let incoming = provider_with(json!(20.0), ts(100));
        assert!(run(&incoming, &mut stored).is_empty());
    }

    #[test]
    fn newer_incoming_wins() {
        let mut stored = provider_with(json!(20.0), ts(100));
        let incoming = provider_with(json!(21.0), ts(200));

        let events = run(&incoming, &mut stored);
        assert!(events.iter().any(|n| matches!(
            n,
            Notification::Data(d)
                if d.old_value == Some(json!(20.0)) && d.new_value == Some(json!(21.0))
        )));
        assert_eq!(
            stored.resource("sensor", "value").unwrap().timestamp(),
            Some(ts(200))
        );
    }

    #[test]
    fn null_incoming_value_removes_the_resource() {
        let mut stored = provider_with(json!(20.0), ts(100));
        let mut incoming = provider_with(json!(20.0), ts(200));
        incoming
            .service_mut("sensor")
            .unwrap()
            .instance
            .resources
            .get_mut("value")
            .unwrap()
            .value = None;

        let events = run(&incoming, &mut stored);
        assert!(events.iter().any(|n| matches!(
            n,
            Notification::Lifecycle(l)
                if l.status == crate::notification::LifecycleStatus::ResourceDeleted
        )));
        assert_eq!(stored.resource("sensor", "value").unwrap().value, None);
    }

    #[test]
    fn resource_absent_from_incoming_is_cleared() {
        let mut stored = provider_with(json!(20.0), ts(100));
        let mut incoming = provider_with(json!(1), ts(200));
        let slot = incoming.service_mut("sensor").unwrap();
        slot.instance.resources.remove("value");
        slot.instance
            .resources
            .insert("other".to_string(), ResourceSlot {
                value: Some(json!(1)),
                metadata: Some(ResourceMetadata::stamped(ts(200), None)),
            });

        run(&incoming, &mut stored);
        assert_eq!(stored.resource("sensor", "value").unwrap().value, None);
        assert_eq!(
            stored.resource("sensor", "other").unwrap().value,
            Some(json!(1))
        );
    }

    #[test]
    fn service_absent_from_incoming_is_removed() {
        let mut stored = provider_with(json!(20.0), ts(100));
        let incoming = Provider::bare("p1", DEFAULT_NAMESPACE, "Temp");

        let events = run(&incoming, &mut stored);
        assert!(stored.service("sensor").is_none());
        assert!(events.iter().any(|n| matches!(
            n,
            Notification::Lifecycle(l)
                if l.status == crate::notification::LifecycleStatus::ServiceDeleted
        )));
    }

    #[test]
    fn admin_identity_and_links_are_never_merged() {
        let mut stored = Provider::new("p1", DEFAULT_NAMESPACE, "Temp", ts(0));
        stored.admin.linked_providers.push("child".to_string());

        let mut incoming = Provider::bare("p1", DEFAULT_NAMESPACE, "Temp");
        incoming.admin.model_name = Some(json!("Other"));
        incoming.admin.linked_providers.push("intruder".to_string());

        run(&incoming, &mut stored);
        assert_eq!(stored.admin.model_name, Some(json!("Temp")));
        assert_eq!(stored.admin.linked_providers, vec!["child".to_string()]);
    }

    #[test]
    fn extras_merge_per_key_and_drop_missing() {
        let mut stored = provider_with(json!(1), ts(100));
        {
            let slot = stored
                .service_mut("sensor")
                .unwrap()
                .instance
                .resources
                .get_mut("value")
                .unwrap();
            let meta = slot.metadata.as_mut().unwrap();
            meta.extra.insert(
                "unit".to_string(),
                MetadataValue::new(json!("C"), Some(ts(100))),
            );
            meta.extra.insert(
                "fresh".to_string(),
                MetadataValue::new(json!("keep-me-not"), Some(ts(500))),
            );
        }

        let mut incoming = provider_with(json!(2), ts(200));
        {
            let slot = incoming
                .service_mut("sensor")
                .unwrap()
                .instance
                .resources
                .get_mut("value")
                .unwrap();
            let meta = slot.metadata.as_mut().unwrap();
            meta.extra.insert(
                "unit".to_string(),
                MetadataValue::new(json!("F"), Some(ts(200))),
            );
            meta.extra.insert(
                "fresh".to_string(),
                MetadataValue::new(json!("stale"), Some(ts(200))),
            );
            meta.extra.insert(
                "new".to_string(),
                MetadataValue::new(json!(7), Some(ts(200))),
            );
        }

        run(&incoming, &mut stored);
        let meta = stored
            .resource("sensor", "value")
            .unwrap()
            .metadata
            .clone()
            .unwrap();
        assert_eq!(meta.extra.get("unit").unwrap().value, json!("F"));
        assert_eq!(meta.extra.get("fresh").unwrap().value, json!("keep-me-not"));
        assert_eq!(meta.extra.get("new").unwrap().value, json!(7));
    }

    #[test]
    fn tolerance_window_accepts_one_millisecond_older() {
        let base = ts(100);
        let mut stored = provider_with(json!(1), base);
        let incoming = provider_with(json!(2), base - Duration::milliseconds(1));

        run(&incoming, &mut stored);
        assert_eq!(
            stored.resource("sensor", "value").unwrap().value,
            Some(json!(2))
        );
    }
}
