use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use twin_nexus_core::{
    ActHandler, LifecycleStatus, Notification, PullHandler, UpdateOutcome, WhiteboardError,
};
use twin_nexus_gateway::{Gateway, GatewayConfig, GatewayHandle};
use chrono::{TimeZone, Utc};

fn ts(seconds: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

async fn spawn_gateway() -> GatewayHandle {
    let (gateway, handle) = Gateway::new(GatewayConfig::default());
    tokio::spawn(gateway.run());
    // The built-in provider appears once the loop is up.
    timeout(Duration::from_secs(5), async {
        loop {
            if handle.get_provider("gateway").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gateway did not start");
    handle
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn builtin_provider_reports_version_and_start() {
    let handle = spawn_gateway().await;

    let version = handle.get_value("gateway", "system", "version").await.unwrap();
    assert_eq!(version.value, Some(json!(0.1)));
    let started = handle.get_value("gateway", "system", "started").await.unwrap();
    assert!(started.value.is_some());

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_emits_debounced_events_in_order() {
    let handle = spawn_gateway().await;
    let mut events = handle.subscribe();

    let outcome = handle
        .data_update(None, "Temp", "t1", "sensor", "value", json!(21.5), Some(ts(10)))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Applied);

    let mut statuses = Vec::new();
    while statuses.len() < 3 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event")
            .unwrap();
        if let Notification::Lifecycle(lifecycle) = event {
            statuses.push(lifecycle.status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            LifecycleStatus::ProviderCreated,
            LifecycleStatus::ServiceCreated,
            LifecycleStatus::ResourceCreated,
        ]
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_update_is_dropped_and_emits_nothing() {
    let handle = spawn_gateway().await;

    handle
        .data_update(None, "Temp", "t1", "sensor", "value", json!(20.0), Some(ts(100)))
        .await
        .unwrap();

    let mut events = handle.subscribe();
    let outcome = handle
        .data_update(None, "Temp", "t1", "sensor", "value", json!(99.0), Some(ts(50)))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Stale);

    let stored = handle.get_value("t1", "sensor", "value").await.unwrap();
    assert_eq!(stored.value, Some(json!(20.0)));
    assert!(
        timeout(Duration::from_millis(200), events.recv()).await.is_err(),
        "stale update must not emit events"
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn link_then_delete_cascades() {
    let handle = spawn_gateway().await;

    for name in ["parent", "child"] {
        handle
            .data_update(None, "Temp", name, "sensor", "value", json!(1), Some(ts(10)))
            .await
            .unwrap();
    }
    handle.link("parent", "child", Some(ts(20))).await.unwrap();

    let parent = handle.get_provider("parent").await.unwrap().unwrap();
    assert_eq!(parent.admin.linked_providers, vec!["child".to_string()]);

    let mut events = handle.subscribe();
    handle
        .delete_provider(None, "Temp", "child")
        .await
        .unwrap();

    let parent = handle.get_provider("parent").await.unwrap().unwrap();
    assert!(parent.admin.linked_providers.is_empty());
    assert!(handle.get_provider("child").await.unwrap().is_none());

    let mut saw_unlink = false;
    let mut saw_delete = false;
    while !(saw_unlink && saw_delete) {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event")
            .unwrap();
        match event {
            Notification::Unlinked(u) if u.provider == "parent" => saw_unlink = true,
            Notification::Lifecycle(l)
                if l.status == LifecycleStatus::ProviderDeleted && l.provider == "child" =>
            {
                saw_delete = true;
            }
            _ => {}
        }
    }

    handle.shutdown().await.unwrap();
}

struct Calibrate;

#[async_trait]
impl ActHandler for Calibrate {
    async fn act(
        &self,
        _provider: String,
        _service: String,
        _resource: String,
        arguments: BTreeMap<String, Value>,
    ) -> Result<Value, WhiteboardError> {
        let offset = arguments
            .get("offset")
            .and_then(Value::as_f64)
            .ok_or_else(|| WhiteboardError::HandlerFailed("missing offset".into()))?;
        Ok(json!(offset + 1.0))
    }
}

struct DevicePull;

#[async_trait]
impl PullHandler for DevicePull {
    async fn pull(
        &self,
        _provider: String,
        _service: String,
        _resource: String,
        _cached: Option<Value>,
    ) -> Result<Option<Value>, WhiteboardError> {
        Ok(Some(json!(42.0)))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn whiteboard_act_and_pull_round_trip() {
    let (mut gateway, handle) = Gateway::new(GatewayConfig::default());
    gateway
        .nexus_mut()
        .whiteboard_mut()
        .register_act("Temp", "sensor", "calibrate", std::sync::Arc::new(Calibrate));
    gateway
        .nexus_mut()
        .whiteboard_mut()
        .register_pull("Temp", "sensor", "value", std::sync::Arc::new(DevicePull));
    tokio::spawn(gateway.run());

    handle
        .data_update(None, "Temp", "t1", "sensor", "value", json!(1.0), Some(ts(10)))
        .await
        .unwrap();

    let mut args = BTreeMap::new();
    args.insert("offset".to_string(), json!(41.0));
    let result = handle.act("t1", "sensor", "calibrate", args).await.unwrap();
    assert_eq!(result, json!(42.0));

    // Missing handler surfaces as a failed call, not a crash.
    assert!(handle
        .act("t1", "sensor", "unhandled", BTreeMap::new())
        .await
        .is_err());

    // A pull both returns and persists the device-side value.
    let pulled = handle.pull("t1", "sensor", "value").await.unwrap();
    assert_eq!(pulled.value, Some(json!(42.0)));
    let stored = handle.get_value("t1", "sensor", "value").await.unwrap();
    assert_eq!(stored.value, Some(json!(42.0)));

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_round_trips_through_the_loop() {
    let handle = spawn_gateway().await;

    handle
        .data_update(None, "Temp", "t1", "sensor", "value", json!(10.0), Some(ts(100)))
        .await
        .unwrap();

    let mut incoming = handle.get_provider("t1").await.unwrap().unwrap();
    incoming
        .service_mut("sensor")
        .unwrap()
        .instance
        .resources
        .get_mut("value")
        .unwrap()
        .value = Some(json!(20.0));
    incoming
        .service_mut("sensor")
        .unwrap()
        .instance
        .resources
        .get_mut("value")
        .unwrap()
        .metadata
        .as_mut()
        .unwrap()
        .timestamp = Some(ts(200));

    let merged = handle.save(incoming).await.unwrap();
    assert_eq!(
        merged.resource("sensor", "value").unwrap().value,
        Some(json!(20.0))
    );
    let stored = handle.get_value("t1", "sensor", "value").await.unwrap();
    assert_eq!(stored.value, Some(json!(20.0)));
    assert_eq!(stored.timestamp, Some(ts(200)));

    handle.shutdown().await.unwrap();
}
