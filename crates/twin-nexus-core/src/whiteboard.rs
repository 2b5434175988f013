//! Handler registry for act, pull and push resources.
//!
//! Southbound connectors register handlers keyed by `(model, service,
//! resource)`. The Nexus dispatches invocations to them and hands back
//! boxed futures so handler failures surface as failed futures rather than
//! panics. Applying a pull or push result to the twin is the caller's job;
//! the whiteboard only talks to the device side.

use crate::error::WhiteboardError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future type returned by whiteboard dispatch.
pub type WhiteboardFuture<T> = Pin<Box<dyn Future<Output = Result<T, WhiteboardError>> + Send>>;

/// Handles invocations of an action resource.
#[async_trait]
pub trait ActHandler: Send + Sync {
    /// Run the action with the given named arguments and produce its result.
    async fn act(
        &self,
        provider: String,
        service: String,
        resource: String,
        arguments: BTreeMap<String, Value>,
    ) -> Result<Value, WhiteboardError>;
}

/// Fetches the current value of an externally readable resource.
#[async_trait]
pub trait PullHandler: Send + Sync {
    /// Read the device-side value. The cached twin value is passed in so a
    /// handler can decide to return it unchanged.
    async fn pull(
        &self,
        provider: String,
        service: String,
        resource: String,
        cached: Option<Value>,
    ) -> Result<Option<Value>, WhiteboardError>;
}

/// Forwards a new value to an externally writable resource.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Write the value to the device and return the value the twin should
    /// store, which may differ from the requested one.
    async fn push(
        &self,
        provider: String,
        service: String,
        resource: String,
        value: Option<Value>,
    ) -> Result<Option<Value>, WhiteboardError>;
}

/// The result of a completed pull or push, ready to re-enter the twin as a
/// plain timestamped update.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalValue {
    /// Value the handler produced
    pub value: Option<Value>,
    /// When the handler produced it
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandlerKey {
    model: String,
    service: String,
    resource: String,
}

/// Registry of act, pull and push handlers keyed by model, service and
/// resource.
#[derive(Default)]
pub struct Whiteboard {
    act: HashMap<HandlerKey, Arc<dyn ActHandler>>,
    pull: HashMap<HandlerKey, Arc<dyn PullHandler>>,
    push: HashMap<HandlerKey, Arc<dyn PushHandler>>,
}

impl std::fmt::Debug for Whiteboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Whiteboard")
            .field("act", &self.act.len())
            .field("pull", &self.pull.len())
            .field("push", &self.push.len())
            .finish()
    }
}

impl Whiteboard {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action handler, replacing any previous one for the key.
    pub fn register_act(
        &mut self,
        model: &str,
        service: &str,
        resource: &str,
        handler: Arc<dyn ActHandler>,
    ) {
        self.act.insert(key(model, service, resource), handler);
    }

    /// Register a pull handler, replacing any previous one for the key.
    pub fn register_pull(
        &mut self,
        model: &str,
        service: &str,
        resource: &str,
        handler: Arc<dyn PullHandler>,
    ) {
        self.pull.insert(key(model, service, resource), handler);
    }

    /// Register a push handler, replacing any previous one for the key.
    pub fn register_push(
        &mut self,
        model: &str,
        service: &str,
        resource: &str,
        handler: Arc<dyn PushHandler>,
    ) {
        self.push.insert(key(model, service, resource), handler);
    }

    /// Remove every handler registered for the key.
    pub fn unregister(&mut self, model: &str, service: &str, resource: &str) {
        let k = key(model, service, resource);
        self.act.remove(&k);
        self.pull.remove(&k);
        self.push.remove(&k);
    }

    /// Dispatch an action invocation.
    ///
    /// A missing handler yields an immediately failed future with
    /// [`WhiteboardError::ActionUnavailable`].
    #[must_use]
    pub fn act(
        &self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        arguments: BTreeMap<String, Value>,
    ) -> WhiteboardFuture<Value> {
        match self.act.get(&key(model, service, resource)) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let (provider, service, resource) = owned(provider, service, resource);
                Box::pin(async move { handler.act(provider, service, resource, arguments).await })
            }
            None => unavailable("act", model, service, resource),
        }
    }

    /// Dispatch a pull, stamping the completion time on success.
    #[must_use]
    pub fn pull(
        &self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        cached: Option<Value>,
    ) -> WhiteboardFuture<ExternalValue> {
        match self.pull.get(&key(model, service, resource)) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let (provider, service, resource) = owned(provider, service, resource);
                Box::pin(async move {
                    let value = handler.pull(provider, service, resource, cached).await?;
                    Ok(ExternalValue {
                        value,
                        timestamp: Utc::now(),
                    })
                })
            }
            None => unavailable("pull", model, service, resource),
        }
    }

    /// Dispatch a push, stamping the completion time on success.
    #[must_use]
    pub fn push(
        &self,
        model: &str,
        provider: &str,
        service: &str,
        resource: &str,
        value: Option<Value>,
    ) -> WhiteboardFuture<ExternalValue> {
        match self.push.get(&key(model, service, resource)) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let (provider, service, resource) = owned(provider, service, resource);
                Box::pin(async move {
                    let value = handler.push(provider, service, resource, value).await?;
                    Ok(ExternalValue {
                        value,
                        timestamp: Utc::now(),
                    })
                })
            }
            None => unavailable("push", model, service, resource),
        }
    }

    /// Whether a pull handler is registered for the key.
    #[must_use]
    pub fn has_pull(&self, model: &str, service: &str, resource: &str) -> bool {
        self.pull.contains_key(&key(model, service, resource))
    }

    /// Whether a push handler is registered for the key.
    #[must_use]
    pub fn has_push(&self, model: &str, service: &str, resource: &str) -> bool {
        self.push.contains_key(&key(model, service, resource))
    }
}

fn key(model: &str, service: &str, resource: &str) -> HandlerKey {
    HandlerKey {
        model: model.to_string(),
        service: service.to_string(),
        resource: resource.to_string(),
    }
}

fn owned(provider: &str, service: &str, resource: &str) -> (String, String, String) {
    (
        provider.to_string(),
        service.to_string(),
        resource.to_string(),
    )
}

fn unavailable<T>(
    operation: &'static str,
    model: &str,
    service: &str,
    resource: &str,
) -> WhiteboardFuture<T>
where
    T: Send + 'static,
{
    let err = WhiteboardError::ActionUnavailable {
        operation,
        model: model.to_string(),
        service: service.to_string(),
        resource: resource.to_string(),
    };
    Box::pin(std::future::ready(Err(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler;

    #[async_trait]
    impl ActHandler for Doubler {
        async fn act(
            &self,
            _provider: String,
            _service: String,
            _resource: String,
            arguments: BTreeMap<String, Value>,
        ) -> Result<Value, WhiteboardError> {
            let input = arguments
                .get("input")
                .and_then(Value::as_f64)
                .ok_or_else(|| WhiteboardError::HandlerFailed("missing input".into()))?;
            Ok(json!(input * 2.0))
        }
    }

    struct FixedPull(Value);

    #[async_trait]
    impl PullHandler for FixedPull {
        async fn pull(
            &self,
            _provider: String,
            _service: String,
            _resource: String,
            _cached: Option<Value>,
        ) -> Result<Option<Value>, WhiteboardError> {
            Ok(Some(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn act_dispatches_to_registered_handler() {
        let mut wb = Whiteboard::new();
        wb.register_act("Temp", "sensor", "double", Arc::new(Doubler));

        let mut args = BTreeMap::new();
        args.insert("input".to_string(), json!(21.0));
        let result = wb.act("Temp", "t1", "sensor", "double", args).await.unwrap();
        assert_eq!(result, json!(42.0));
    }

    #[tokio::test]
    async fn missing_handler_fails_immediately() {
        let wb = Whiteboard::new();
        let err = wb
            .act("Temp", "t1", "sensor", "double", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WhiteboardError::ActionUnavailable { .. }));
    }

    #[tokio::test]
    async fn handler_failure_surfaces_as_error() {
        let mut wb = Whiteboard::new();
        wb.register_act("Temp", "sensor", "double", Arc::new(Doubler));
        let err = wb
            .act("Temp", "t1", "sensor", "double", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WhiteboardError::HandlerFailed(_)));
    }

    #[tokio::test]
    async fn pull_stamps_a_timestamp() {
        let mut wb = Whiteboard::new();
        wb.register_pull("Temp", "sensor", "value", Arc::new(FixedPull(json!(19.5))));
        let before = Utc::now();
        let pulled = wb
            .pull("Temp", "t1", "sensor", "value", None)
            .await
            .unwrap();
        assert_eq!(pulled.value, Some(json!(19.5)));
        assert!(pulled.timestamp >= before);
    }

    #[tokio::test]
    async fn unregister_removes_all_kinds() {
        let mut wb = Whiteboard::new();
        wb.register_act("Temp", "sensor", "double", Arc::new(Doubler));
        wb.register_pull("Temp", "sensor", "double", Arc::new(FixedPull(json!(1))));
        wb.unregister("Temp", "sensor", "double");
        assert!(!wb.has_pull("Temp", "sensor", "double"));
    }
}
