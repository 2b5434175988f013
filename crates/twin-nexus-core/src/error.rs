//! Error taxonomy for the Model Nexus.
//!
//! Errors fall into three synchronous categories: [`ErrorKind::NotFound`]
//! for absent referents, [`ErrorKind::Conflict`] for duplicate names or a
//! provider id bound to another model, and [`ErrorKind::InvalidArgument`]
//! for malformed requests. A lost timestamp race is *not* an error: stale
//! updates are silently dropped and reported as
//! [`crate::nexus::UpdateOutcome::Stale`]. Whiteboard failures surface only
//! through failed futures as [`WhiteboardError`].

use thiserror::Error;

/// Coarse classification of a [`NexusError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced namespace, model, provider, service, or resource is absent.
    NotFound,
    /// A duplicate name, or a provider id already bound to a model.
    Conflict,
    /// A blank or malformed field in an otherwise well-formed request.
    InvalidArgument,
}

/// Errors raised synchronously by Nexus operations.
#[derive(Debug, Clone, Error)]
pub enum NexusError {
    /// No namespace registered under the given URI.
    #[error("no namespace {0}")]
    NamespaceNotFound(String),

    /// No model with the given name in the namespace.
    #[error("no model with name {name} in namespace {namespace}")]
    ModelNotFound {
        /// Namespace URI
        namespace: String,
        /// Requested model name
        name: String,
    },

    /// No provider instance with the given id.
    #[error("no provider {0}")]
    ProviderNotFound(String),

    /// The provider exists but has no such service instance.
    #[error("no service {service} on provider {provider}")]
    ServiceNotFound {
        /// Provider id
        provider: String,
        /// Requested service name
        service: String,
    },

    /// No service type with the given name in the namespace.
    #[error("no service type {name} in namespace {namespace}")]
    ServiceTypeNotFound {
        /// Namespace URI
        namespace: String,
        /// Requested service type name
        name: String,
    },

    /// The service exists but holds no such resource.
    #[error("no resource {resource} in service {service}")]
    ResourceNotFound {
        /// Service name
        service: String,
        /// Requested resource name
        resource: String,
    },

    /// A model with this name already exists in the namespace.
    #[error("there is an existing model with name {name} in namespace {namespace}")]
    ModelExists {
        /// Namespace URI
        namespace: String,
        /// Colliding model name
        name: String,
    },

    /// The model already declares a field with this name.
    #[error("there is an existing field with name {field} in model {model}")]
    ServiceExists {
        /// Model name
        model: String,
        /// Colliding field name
        field: String,
    },

    /// The service type already declares a resource or action with this name.
    #[error("there is an existing resource with name {resource} in service {service}")]
    ResourceExists {
        /// Service type name
        service: String,
        /// Colliding resource name
        resource: String,
    },

    /// The provider id is already bound to the same model.
    #[error("the provider {provider} already exists with the model {model}")]
    ProviderExists {
        /// Provider id
        provider: String,
        /// Model the id is bound to
        model: String,
    },

    /// The provider id is already bound to a different model.
    #[error("the provider {provider} already exists with a different model {model}")]
    ProviderExistsWithDifferentModel {
        /// Provider id
        provider: String,
        /// Model the id is actually bound to
        model: String,
    },

    /// A dynamic service name shadows a statically declared service slot.
    #[error("dynamic service {service} collides with a declared service on model {model}")]
    DynamicServiceCollision {
        /// Model name
        model: String,
        /// Colliding service name
        service: String,
    },

    /// An incoming provider graph targets a different model than the stored one.
    #[error("provider {provider} is of model {stored}, cannot merge an instance of model {incoming}")]
    ModelMismatch {
        /// Provider id
        provider: String,
        /// Model of the stored instance
        stored: String,
        /// Model of the incoming instance
        incoming: String,
    },

    /// A required name was blank.
    #[error("empty name")]
    EmptyName,

    /// `set_resource_metadata` was called with a blank key.
    #[error("empty metadata key")]
    EmptyMetadataKey,

    /// A required timestamp was missing.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// The value cannot be represented as the declared resource type.
    #[error("cannot coerce {value} to {expected}")]
    Coercion {
        /// Human-readable target type
        expected: String,
        /// Rendering of the rejected value
        value: String,
    },

    /// A bounded collection resource received more elements than declared.
    #[error("collection for resource {resource} exceeds bound of {bound} elements")]
    BoundExceeded {
        /// Resource name
        resource: String,
        /// Declared upper bound
        bound: usize,
    },

    /// Events for one target were accumulated out of temporal order.
    #[error("received {0} updates out of temporal order")]
    OutOfOrder(&'static str),

    /// The notification accumulator was used after `complete()`.
    #[error("notification accumulator already completed")]
    AccumulatorCompleted,
}

impl NexusError {
    /// Classify this error into the coarse taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NamespaceNotFound(_)
            | Self::ModelNotFound { .. }
            | Self::ProviderNotFound(_)
            | Self::ServiceNotFound { .. }
            | Self::ServiceTypeNotFound { .. }
            | Self::ResourceNotFound { .. } => ErrorKind::NotFound,
            Self::ModelExists { .. }
            | Self::ServiceExists { .. }
            | Self::ResourceExists { .. }
            | Self::ProviderExists { .. }
            | Self::ProviderExistsWithDifferentModel { .. }
            | Self::DynamicServiceCollision { .. }
            | Self::ModelMismatch { .. } => ErrorKind::Conflict,
            Self::EmptyName
            | Self::EmptyMetadataKey
            | Self::InvalidTimestamp
            | Self::Coercion { .. }
            | Self::BoundExceeded { .. }
            | Self::OutOfOrder(_)
            | Self::AccumulatorCompleted => ErrorKind::InvalidArgument,
        }
    }
}

/// Errors carried by whiteboard futures.
///
/// Never thrown synchronously: a missing handler is observed only when the
/// returned future resolves.
#[derive(Debug, Clone, Error)]
pub enum WhiteboardError {
    /// No handler is registered for the addressed resource.
    #[error("no {operation} handler registered for {model}/{service}/{resource}")]
    ActionUnavailable {
        /// One of `act`, `pull`, `push`
        operation: &'static str,
        /// Model name
        model: String,
        /// Service name
        service: String,
        /// Resource name
        resource: String,
    },

    /// The registered handler failed or was cancelled.
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            NexusError::ProviderNotFound("p".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            NexusError::ProviderExists {
                provider: "p".into(),
                model: "m".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(NexusError::EmptyMetadataKey.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn distinct_provider_conflict_messages() {
        let same = NexusError::ProviderExists {
            provider: "p1".into(),
            model: "Temp".into(),
        };
        let different = NexusError::ProviderExistsWithDifferentModel {
            provider: "p1".into(),
            model: "Humidity".into(),
        };
        assert_ne!(same.to_string(), different.to_string());
        assert!(different.to_string().contains("different model"));
    }
}
