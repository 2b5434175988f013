//! The gateway runtime: one writer task owning the Nexus.
//!
//! Every mutating or reading call is a command sent into an mpsc channel;
//! the loop executes commands strictly in arrival order against the
//! [`ModelNexus`] and flushes each command's debounced notifications into
//! the broadcast event stream. This realizes the single-logical-writer
//! model: the core holds no locks, and readers receive deep-copied
//! snapshots.

use crate::config::GatewayConfig;
use crate::events::BroadcastSink;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use twin_nexus_core::{
    instant_value, ExternalValue, MetadataValue, ModelNexus, NexusError, Notification,
    NotificationAccumulator, Provider, TimedValue, UpdateOutcome, WhiteboardFuture,
};

type Reply<T> = oneshot::Sender<Result<T, NexusError>>;

enum GatewayCommand {
    DataUpdate {
        namespace: Option<String>,
        model: String,
        provider: String,
        service: String,
        resource: String,
        value: Value,
        timestamp: Option<DateTime<Utc>>,
        reply: Reply<UpdateOutcome>,
    },
    Save {
        provider: Provider,
        reply: Reply<Provider>,
    },
    CreateProvider {
        namespace: Option<String>,
        model: String,
        id: String,
        timestamp: DateTime<Utc>,
        reply: Reply<Provider>,
    },
    DeleteProvider {
        namespace: Option<String>,
        model: String,
        name: String,
        reply: Reply<()>,
    },
    DeleteModel {
        namespace: Option<String>,
        name: String,
        reply: Reply<()>,
    },
    Link {
        parent: String,
        child: String,
        timestamp: Option<DateTime<Utc>>,
        reply: Reply<UpdateOutcome>,
    },
    Unlink {
        parent: String,
        child: String,
        timestamp: Option<DateTime<Utc>>,
        reply: Reply<UpdateOutcome>,
    },
    SetMetadata {
        provider: String,
        service: String,
        resource: String,
        key: String,
        value: Value,
        timestamp: Option<DateTime<Utc>>,
        reply: Reply<()>,
    },
    GetMetadata {
        provider: String,
        service: String,
        resource: String,
        key: String,
        reply: Reply<Option<MetadataValue>>,
    },
    GetProvider {
        name: String,
        reply: oneshot::Sender<Option<Provider>>,
    },
    GetValue {
        provider: String,
        service: String,
        resource: String,
        reply: Reply<TimedValue>,
    },
    Act {
        provider: String,
        service: String,
        resource: String,
        arguments: BTreeMap<String, Value>,
        reply: Reply<WhiteboardFuture<Value>>,
    },
    Pull {
        provider: String,
        service: String,
        resource: String,
        reply: Reply<WhiteboardFuture<ExternalValue>>,
    },
    Push {
        provider: String,
        service: String,
        resource: String,
        value: Option<Value>,
        reply: Reply<WhiteboardFuture<ExternalValue>>,
    },
    ApplyExternal {
        provider: String,
        service: String,
        resource: String,
        value: Value,
        timestamp: DateTime<Utc>,
        reply: Reply<UpdateOutcome>,
    },
    Shutdown,
}

/// The writer task owning the Nexus.
pub struct Gateway {
    config: GatewayConfig,
    nexus: ModelNexus,
    commands: mpsc::Receiver<GatewayCommand>,
    events: BroadcastSink,
}

/// Cheap, cloneable front door to a running [`Gateway`].
#[derive(Clone)]
pub struct GatewayHandle {
    commands: mpsc::Sender<GatewayCommand>,
    events: broadcast::Sender<Notification>,
}

impl Gateway {
    /// Create a gateway and the handle talking to it.
    #[must_use]
    pub fn new(config: GatewayConfig) -> (Self, GatewayHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let gateway = Self {
            config,
            nexus: ModelNexus::default(),
            commands: command_rx,
            events: BroadcastSink::new(event_tx.clone()),
        };
        let handle = GatewayHandle {
            commands: command_tx,
            events: event_tx,
        };
        (gateway, handle)
    }

    /// Mutable access to the Nexus before the loop starts, for registering
    /// whiteboard handlers or a custom merge strategy.
    pub fn nexus_mut(&mut self) -> &mut ModelNexus {
        &mut self.nexus
    }

    /// Run the writer loop until shutdown.
    ///
    /// Registers the built-in gateway provider (model and provider named
    /// after the configuration, a `system` service with `version` and
    /// `started` resources), then serves commands until a shutdown command,
    /// the last handle dropping, or Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the built-in provider cannot be registered.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(provider = %self.config.provider_name, "Starting gateway runtime");
        self.register_builtin_provider()
            .context("Failed to register the built-in gateway provider")?;

        loop {
            tokio::select! {
                maybe = self.commands.recv() => match maybe {
                    Some(command) => {
                        if self.handle_command(command) {
                            tracing::info!("Shutdown command received");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("All gateway handles dropped");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        tracing::info!("Gateway stopped");
        Ok(())
    }

    fn register_builtin_provider(&mut self) -> Result<(), NexusError> {
        let name = self.config.provider_name.clone();
        let now = Utc::now();
        let mut accumulator = NotificationAccumulator::new();
        self.nexus.handle_data_update(
            None,
            &name,
            &name,
            "system",
            "version",
            Value::from(self.config.version),
            Some(now),
            &mut accumulator,
        )?;
        self.nexus.handle_data_update(
            None,
            &name,
            &name,
            "system",
            "started",
            instant_value(now),
            Some(now),
            &mut accumulator,
        )?;
        accumulator.complete(&self.events);
        Ok(())
    }

    /// Returns true when the loop should stop.
    #[allow(clippy::too_many_lines)]
    fn handle_command(&mut self, command: GatewayCommand) -> bool {
        match command {
            GatewayCommand::DataUpdate {
                namespace,
                model,
                provider,
                service,
                resource,
                value,
                timestamp,
                reply,
            } => {
                let result = self.transact(|nexus, acc| {
                    nexus.handle_data_update(
                        namespace.as_deref(),
                        &model,
                        &provider,
                        &service,
                        &resource,
                        value,
                        timestamp,
                        acc,
                    )
                });
                let _ = reply.send(result);
            }
            GatewayCommand::Save { provider, reply } => {
                let result = self.transact(|nexus, acc| nexus.save(provider, acc));
                let _ = reply.send(result);
            }
            GatewayCommand::CreateProvider {
                namespace,
                model,
                id,
                timestamp,
                reply,
            } => {
                let result = self.transact(|nexus, acc| {
                    nexus.create_provider_instance(
                        namespace.as_deref(),
                        &model,
                        &id,
                        timestamp,
                        acc,
                    )
                });
                let _ = reply.send(result);
            }
            GatewayCommand::DeleteProvider {
                namespace,
                model,
                name,
                reply,
            } => {
                let result = self.transact(|nexus, acc| {
                    nexus.delete_provider(namespace.as_deref(), &model, &name, acc)
                });
                let _ = reply.send(result);
            }
            GatewayCommand::DeleteModel {
                namespace,
                name,
                reply,
            } => {
                let result = self
                    .transact(|nexus, acc| nexus.delete_model(namespace.as_deref(), &name, acc));
                let _ = reply.send(result);
            }
            GatewayCommand::Link {
                parent,
                child,
                timestamp,
                reply,
            } => {
                let result =
                    self.transact(|nexus, acc| nexus.link_providers(&parent, &child, timestamp, acc));
                let _ = reply.send(result);
            }
            GatewayCommand::Unlink {
                parent,
                child,
                timestamp,
                reply,
            } => {
                let result = self
                    .transact(|nexus, acc| nexus.unlink_providers(&parent, &child, timestamp, acc));
                let _ = reply.send(result);
            }
            GatewayCommand::SetMetadata {
                provider,
                service,
                resource,
                key,
                value,
                timestamp,
                reply,
            } => {
                let result = self.transact(|nexus, acc| {
                    nexus.set_resource_metadata(
                        &provider, &service, &resource, &key, value, timestamp, acc,
                    )
                });
                let _ = reply.send(result);
            }
            GatewayCommand::GetMetadata {
                provider,
                service,
                resource,
                key,
                reply,
            } => {
                let _ = reply.send(
                    self.nexus
                        .get_resource_metadata(&provider, &service, &resource, &key),
                );
            }
            GatewayCommand::GetProvider { name, reply } => {
                let _ = reply.send(self.nexus.get_provider(&name));
            }
            GatewayCommand::GetValue {
                provider,
                service,
                resource,
                reply,
            } => {
                let _ = reply.send(self.nexus.get_resource_value(&provider, &service, &resource));
            }
            GatewayCommand::Act {
                provider,
                service,
                resource,
                arguments,
                reply,
            } => {
                let result = self.transact(|nexus, acc| {
                    nexus.act_resource(&provider, &service, &resource, arguments, acc)
                });
                let _ = reply.send(result);
            }
            GatewayCommand::Pull {
                provider,
                service,
                resource,
                reply,
            } => {
                let _ = reply.send(self.nexus.pull_value(&provider, &service, &resource));
            }
            GatewayCommand::Push {
                provider,
                service,
                resource,
                value,
                reply,
            } => {
                let _ = reply.send(self.nexus.push_value(&provider, &service, &resource, value));
            }
            GatewayCommand::ApplyExternal {
                provider,
                service,
                resource,
                value,
                timestamp,
                reply,
            } => {
                let identity = self
                    .nexus
                    .get_provider(&provider)
                    .map(|p| (p.namespace, p.model_name))
                    .ok_or_else(|| NexusError::ProviderNotFound(provider.clone()));
                let result = identity.and_then(|(namespace, model)| {
                    self.transact(|nexus, acc| {
                        nexus.handle_data_update(
                            Some(&namespace),
                            &model,
                            &provider,
                            &service,
                            &resource,
                            value,
                            Some(timestamp),
                            acc,
                        )
                    })
                });
                let _ = reply.send(result);
            }
            GatewayCommand::Shutdown => return true,
        }
        false
    }

    /// Run one command as a notification transaction: flush the debounced
    /// batch on success, discard it on failure.
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut ModelNexus, &mut NotificationAccumulator) -> Result<T, NexusError>,
    ) -> Result<T, NexusError> {
        let mut accumulator = NotificationAccumulator::new();
        match op(&mut self.nexus, &mut accumulator) {
            Ok(result) => {
                accumulator.complete(&self.events);
                Ok(result)
            }
            Err(err) => {
                tracing::debug!(error = %err, "command failed, dropping its notifications");
                accumulator.abort();
                Err(err)
            }
        }
    }
}

impl GatewayHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> GatewayCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| anyhow!("gateway command loop is not running"))?;
        rx.await.context("gateway dropped the reply channel")
    }

    /// Subscribe to the debounced notification stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// Apply one southbound value update.
    ///
    /// # Errors
    ///
    /// Core errors from the update engine, or a stopped gateway.
    #[allow(clippy::too_many_arguments)]
    pub async fn data_update(
        &self,
        namespace: Option<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
        value: Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<UpdateOutcome> {
        let (model, provider) = (model.into(), provider.into());
        let (service, resource) = (service.into(), resource.into());
        Ok(self
            .request(|reply| GatewayCommand::DataUpdate {
                namespace,
                model,
                provider,
                service,
                resource,
                value,
                timestamp,
                reply,
            })
            .await??)
    }

    /// Reconcile a detached provider graph, returning the merged snapshot.
    ///
    /// # Errors
    ///
    /// Core errors from the merge boundary, or a stopped gateway.
    pub async fn save(&self, provider: Provider) -> Result<Provider> {
        Ok(self
            .request(|reply| GatewayCommand::Save { provider, reply })
            .await??)
    }

    /// Instantiate a provider of a registered model.
    ///
    /// # Errors
    ///
    /// Core conflict/not-found errors, or a stopped gateway.
    pub async fn create_provider(
        &self,
        namespace: Option<String>,
        model: impl Into<String>,
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Provider> {
        let (model, id) = (model.into(), id.into());
        Ok(self
            .request(|reply| GatewayCommand::CreateProvider {
                namespace,
                model,
                id,
                timestamp,
                reply,
            })
            .await??)
    }

    /// Delete a provider instance.
    ///
    /// # Errors
    ///
    /// Core not-found errors, or a stopped gateway.
    pub async fn delete_provider(
        &self,
        namespace: Option<String>,
        model: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<()> {
        let (model, name) = (model.into(), name.into());
        Ok(self
            .request(|reply| GatewayCommand::DeleteProvider {
                namespace,
                model,
                name,
                reply,
            })
            .await??)
    }

    /// Delete a model and all of its provider instances.
    ///
    /// # Errors
    ///
    /// Core not-found errors, or a stopped gateway.
    pub async fn delete_model(
        &self,
        namespace: Option<String>,
        name: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        Ok(self
            .request(|reply| GatewayCommand::DeleteModel {
                namespace,
                name,
                reply,
            })
            .await??)
    }

    /// Link `parent` to `child`.
    ///
    /// # Errors
    ///
    /// Core not-found errors, or a stopped gateway.
    pub async fn link(
        &self,
        parent: impl Into<String>,
        child: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<UpdateOutcome> {
        let (parent, child) = (parent.into(), child.into());
        Ok(self
            .request(|reply| GatewayCommand::Link {
                parent,
                child,
                timestamp,
                reply,
            })
            .await??)
    }

    /// Remove the link from `parent` to `child`.
    ///
    /// # Errors
    ///
    /// Core not-found errors, or a stopped gateway.
    pub async fn unlink(
        &self,
        parent: impl Into<String>,
        child: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<UpdateOutcome> {
        let (parent, child) = (parent.into(), child.into());
        Ok(self
            .request(|reply| GatewayCommand::Unlink {
                parent,
                child,
                timestamp,
                reply,
            })
            .await??)
    }

    /// Store one named metadata entry on a resource.
    ///
    /// # Errors
    ///
    /// Core validation errors, or a stopped gateway.
    pub async fn set_metadata(
        &self,
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let (provider, service) = (provider.into(), service.into());
        let (resource, key) = (resource.into(), key.into());
        Ok(self
            .request(|reply| GatewayCommand::SetMetadata {
                provider,
                service,
                resource,
                key,
                value,
                timestamp,
                reply,
            })
            .await??)
    }

    /// Read one named metadata entry; `None` means present-but-empty.
    ///
    /// # Errors
    ///
    /// Core not-found errors, or a stopped gateway.
    pub async fn get_metadata(
        &self,
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Option<MetadataValue>> {
        let (provider, service) = (provider.into(), service.into());
        let (resource, key) = (resource.into(), key.into());
        Ok(self
            .request(|reply| GatewayCommand::GetMetadata {
                provider,
                service,
                resource,
                key,
                reply,
            })
            .await??)
    }

    /// A deep-copied snapshot of a provider.
    ///
    /// # Errors
    ///
    /// Returns error only for a stopped gateway.
    pub async fn get_provider(&self, name: impl Into<String>) -> Result<Option<Provider>> {
        let name = name.into();
        self.request(|reply| GatewayCommand::GetProvider { name, reply })
            .await
    }

    /// The current timestamped value of a resource.
    ///
    /// # Errors
    ///
    /// Core not-found errors, or a stopped gateway.
    pub async fn get_value(
        &self,
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
    ) -> Result<TimedValue> {
        let (provider, service, resource) = (provider.into(), service.into(), resource.into());
        Ok(self
            .request(|reply| GatewayCommand::GetValue {
                provider,
                service,
                resource,
                reply,
            })
            .await??)
    }

    /// Invoke an action resource and await its result.
    ///
    /// # Errors
    ///
    /// Handler absence or failure, core not-found errors, or a stopped
    /// gateway.
    pub async fn act(
        &self,
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
        arguments: BTreeMap<String, Value>,
    ) -> Result<Value> {
        let (provider, service, resource) = (provider.into(), service.into(), resource.into());
        let future = self
            .request(|reply| GatewayCommand::Act {
                provider,
                service,
                resource,
                arguments,
                reply,
            })
            .await??;
        Ok(future.await?)
    }

    /// Pull the device-side value of a resource and persist the result.
    ///
    /// The pulled value re-enters the update engine as an ordinary
    /// timestamped update before being returned; a handler returning no
    /// value leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Handler absence or failure, core errors, or a stopped gateway.
    pub async fn pull(
        &self,
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
    ) -> Result<TimedValue> {
        let (provider, service, resource) = (provider.into(), service.into(), resource.into());
        let future = self
            .request(|reply| GatewayCommand::Pull {
                provider: provider.clone(),
                service: service.clone(),
                resource: resource.clone(),
                reply,
            })
            .await??;
        let external = future.await?;
        self.apply_external(provider, service, resource, external)
            .await
    }

    /// Push a value to the device side and persist what it accepted.
    ///
    /// # Errors
    ///
    /// Handler absence or failure, core errors, or a stopped gateway.
    pub async fn push(
        &self,
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
        value: Option<Value>,
    ) -> Result<TimedValue> {
        let (provider, service, resource) = (provider.into(), service.into(), resource.into());
        let future = self
            .request(|reply| GatewayCommand::Push {
                provider: provider.clone(),
                service: service.clone(),
                resource: resource.clone(),
                value,
                reply,
            })
            .await??;
        let external = future.await?;
        self.apply_external(provider, service, resource, external)
            .await
    }

    async fn apply_external(
        &self,
        provider: String,
        service: String,
        resource: String,
        external: ExternalValue,
    ) -> Result<TimedValue> {
        match external.value {
            Some(value) => {
                let applied = value.clone();
                self.request(|reply| GatewayCommand::ApplyExternal {
                    provider,
                    service,
                    resource,
                    value,
                    timestamp: external.timestamp,
                    reply,
                })
                .await??;
                Ok(TimedValue::new(applied, external.timestamp))
            }
            None => Ok(TimedValue {
                value: None,
                timestamp: Some(external.timestamp),
            }),
        }
    }

    /// Ask the gateway loop to stop.
    ///
    /// # Errors
    ///
    /// Returns error if the loop is already gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(GatewayCommand::Shutdown)
            .await
            .map_err(|_| anyhow!("gateway command loop is not running"))
    }
}
