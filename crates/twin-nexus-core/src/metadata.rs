//! Per-resource metadata and the timestamp conflict gate.
//!
//! Every resource value carries bookkeeping that is versioned independently
//! of the value itself: the timestamp of the last accepted write, a lock
//! flag, the original (pre-sanitization) resource name, and an open map of
//! named extra entries, each with its own timestamp.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single named metadata entry with its own timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataValue {
    /// The entry's value
    pub value: Value,
    /// When the entry was last written
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetadataValue {
    /// Create an entry, optionally stamped.
    #[must_use]
    pub fn new(value: Value, timestamp: Option<DateTime<Utc>>) -> Self {
        Self { value, timestamp }
    }

    /// The last-writer-wins gate for merging a single extra entry, with the
    /// same 1ms tolerance as resource value updates.
    #[must_use]
    pub fn allows_overwrite(&self, incoming: DateTime<Utc>) -> bool {
        match self.timestamp {
            None => true,
            Some(stored) => stored <= incoming + Duration::milliseconds(1),
        }
    }
}

/// Metadata attached to one resource value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Timestamp of the last accepted write. Never regresses through an
    /// accepted update.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the resource is locked against external writes
    pub locked: bool,
    /// The originally requested resource name, before sanitization
    pub original_name: Option<String>,
    /// Open map of independently timestamped extra entries
    pub extra: BTreeMap<String, MetadataValue>,
}

impl ResourceMetadata {
    /// Metadata stamped at creation time, remembering the requested name.
    #[must_use]
    pub fn stamped(timestamp: DateTime<Utc>, original_name: Option<String>) -> Self {
        Self {
            timestamp: Some(timestamp),
            locked: false,
            original_name,
            extra: BTreeMap::new(),
        }
    }

    /// The last-writer-wins conflict gate for value updates.
    ///
    /// Accepts the incoming timestamp unless the stored one is strictly
    /// after `incoming + 1ms`. The tolerance window absorbs same-instant
    /// writes from different southbound sources.
    #[must_use]
    pub fn allows_update(&self, incoming: DateTime<Utc>) -> bool {
        match self.timestamp {
            None => true,
            Some(stored) => stored <= incoming + Duration::milliseconds(1),
        }
    }

    /// The conflict gate applied to provider link-list updates.
    ///
    /// Same comparison as [`Self::allows_update`] but without the 1ms
    /// tolerance window.
    #[must_use]
    pub fn allows_link_update(&self, incoming: DateTime<Utc>) -> bool {
        match self.timestamp {
            None => true,
            Some(stored) => stored <= incoming,
        }
    }

    /// Flatten this metadata into the open map carried by notifications.
    ///
    /// Includes every extra entry under its own key, then the fixed
    /// attributes `"timestamp"`, `"locked"`, `"originalName"` and the
    /// resource value under `"value"`. The fixed keys are reserved: an
    /// extra entry stored under one of them is shadowed in this view
    /// (though still readable by key through the extras map).
    #[must_use]
    pub fn to_map(&self, value: Option<&Value>) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        for (key, entry) in &self.extra {
            map.insert(key.clone(), entry.value.clone());
        }
        map.insert(
            "timestamp".to_string(),
            self.timestamp
                .map_or(Value::Null, |ts| Value::String(ts.to_rfc3339())),
        );
        map.insert("locked".to_string(), Value::Bool(self.locked));
        map.insert(
            "originalName".to_string(),
            self.original_name
                .as_ref()
                .map_or(Value::Null, |n| Value::String(n.clone())),
        );
        map.insert("value".to_string(), value.cloned().unwrap_or(Value::Null));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[test]
    fn missing_metadata_timestamp_accepts_anything() {
        let meta = ResourceMetadata::default();
        assert!(meta.allows_update(ts(0)));
    }

    #[test]
    fn updates_within_tolerance_accepted() {
        let mut meta = ResourceMetadata::default();
        meta.timestamp = Some(ts(10_000));

        // Later, equal, and up to 1ms earlier all pass
        assert!(meta.allows_update(ts(10_500)));
        assert!(meta.allows_update(ts(10_000)));
        assert!(meta.allows_update(ts(9_999)));
        // Strictly more than 1ms earlier is stale
        assert!(!meta.allows_update(ts(9_998)));
        assert!(!meta.allows_update(ts(9_000)));
    }

    #[test]
    fn link_gate_has_no_tolerance() {
        let mut meta = ResourceMetadata::default();
        meta.timestamp = Some(ts(10_000));

        assert!(meta.allows_link_update(ts(10_000)));
        assert!(!meta.allows_link_update(ts(9_999)));
    }

    #[test]
    fn metadata_map_includes_extras_and_value() {
        let mut meta = ResourceMetadata::stamped(ts(5_000), Some("Raw Name".to_string()));
        meta.extra.insert(
            "unit".to_string(),
            MetadataValue::new(json!("°C"), Some(ts(5_000))),
        );

        let map = meta.to_map(Some(&json!(21.5)));
        assert_eq!(map["unit"], json!("°C"));
        assert_eq!(map["value"], json!(21.5));
        assert_eq!(map["originalName"], json!("Raw Name"));
        assert_eq!(map["locked"], json!(false));
    }

    #[test]
    fn reserved_keys_shadow_extras_in_the_map_view() {
        let mut meta = ResourceMetadata::stamped(ts(5_000), None);
        meta.extra.insert(
            "locked".to_string(),
            MetadataValue::new(json!("impostor"), Some(ts(5_000))),
        );
        meta.extra.insert(
            "value".to_string(),
            MetadataValue::new(json!("impostor"), Some(ts(5_000))),
        );

        let map = meta.to_map(Some(&json!(21.5)));
        assert_eq!(map["locked"], json!(false));
        assert_eq!(map["value"], json!(21.5));
        // The extras themselves are untouched.
        assert_eq!(meta.extra["locked"].value, json!("impostor"));
    }
}
