//! Error types for Estuary.
//!
//! This module provides a structured error hierarchy using `thiserror`:
//!
//! - [`TransformerError`] - Payload conversion failures
//! - [`AccessError`] - Single-writer violations on a message
//! - [`MessageError`] - Failures of the message API
//! - [`MessagingError`], [`RoutingError`], [`LifecycleError`] - Processing
//!   failures, classified by the exception listener
//! - [`VoidEventError`] - Access to a void event outcome
//! - [`ConfigError`] - Configuration loading

use crate::data_type::DataType;
use std::thread::ThreadId;
use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while converting a payload from one data type to another.
#[derive(Error, Debug)]
pub enum TransformerError {
    /// No registered transformer converts between the two types.
    #[error("no transformer found to convert {source_type} to {target_type}")]
    NoTransformerFound {
        /// Data type of the current payload.
        source_type: DataType,
        /// Requested data type.
        target_type: DataType,
    },

    /// The transformer produced a value of the wrong type.
    #[error("transformer `{transformer}` returned {actual}, which is not assignable to {expected}")]
    TypeMismatch {
        /// Name of the offending transformer.
        transformer: String,
        /// Requested data type.
        expected: DataType,
        /// Runtime type name of the produced value.
        actual: String,
    },

    /// The transformer cannot accept the current payload and no implicit
    /// conversion was found.
    #[error("cannot apply transformer `{transformer}` on source payload of type {payload_type}")]
    CannotApply {
        /// Name of the transformer.
        transformer: String,
        /// Runtime type name of the payload.
        payload_type: String,
    },

    /// The transformer itself failed.
    #[error("transformer `{transformer}` failed")]
    Failed {
        /// Name of the transformer.
        transformer: String,
        /// Underlying failure.
        #[source]
        cause: BoxError,
    },

    /// A stream payload was read a second time.
    #[error("stream payload has already been consumed")]
    StreamConsumed,
}

/// A thread-safety violation detected on a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// A thread other than the owner attempted a write.
    #[error("only owner thread can write to message: {owner:?}/{current:?}")]
    NonOwnerWrite {
        /// Thread that first accessed the message.
        owner: ThreadId,
        /// Thread attempting the write.
        current: ThreadId,
    },

    /// A write after the message was marked immutable.
    #[error("cannot write to immutable message")]
    ImmutableWrite,
}

/// Errors returned by the message API.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Thread-safety violation.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Payload conversion failure.
    #[error(transparent)]
    Transformer(#[from] TransformerError),

    /// A SESSION-scope write with no session bound to the message.
    #[error("no active session to hold session property `{key}`")]
    NoActiveSession {
        /// Property key that could not be stored.
        key: String,
    },

    /// A collection operation on a simple message.
    #[error("message is not a collection")]
    NotACollection,

    /// A collection operation after the collection payload was replaced.
    #[error("collection payload was replaced; collection operations are no longer available")]
    InvalidatedCollection,

    /// A property value could not be read as the requested type.
    #[error("property `{key}` holds a {actual} value, expected {expected}")]
    WrongPropertyType {
        /// Property key.
        key: String,
        /// Requested kind.
        expected: &'static str,
        /// Stored kind.
        actual: &'static str,
    },

    /// The operation is not available on this kind of message.
    #[error("{0} is not supported on a message collection")]
    Unsupported(&'static str),
}

/// A failure while processing a message in a pipeline.
#[derive(Error, Debug)]
#[error("{description}")]
pub struct MessagingError {
    description: String,
    component: Option<String>,
    #[source]
    cause: Option<BoxError>,
}

impl MessagingError {
    /// Create a new messaging error.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            component: None,
            cause: None,
        }
    }

    /// Name the component that failed.
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// The human readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The failing component, if known.
    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }
}

/// A failure to route a message to an endpoint.
#[derive(Error, Debug)]
#[error("{description} (endpoint: {endpoint})")]
pub struct RoutingError {
    description: String,
    endpoint: String,
    #[source]
    cause: Option<BoxError>,
}

impl RoutingError {
    /// Create a new routing error for the given endpoint URI.
    pub fn new(description: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            endpoint: endpoint.into(),
            cause: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// URI of the endpoint that could not be reached.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// A failure in a component's lifecycle.
#[derive(Error, Debug)]
#[error("lifecycle phase `{phase}` failed for `{component}`")]
pub struct LifecycleError {
    component: String,
    phase: &'static str,
    #[source]
    cause: Option<BoxError>,
}

impl LifecycleError {
    /// Create a new lifecycle error.
    pub fn new(component: impl Into<String>, phase: &'static str) -> Self {
        Self {
            component: component.into(),
            phase,
            cause: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Component that failed.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Lifecycle phase that failed.
    pub fn phase(&self) -> &'static str {
        self.phase
    }
}

/// Access to an event through a void outcome.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("`{0}` is not available on a void event")]
pub struct VoidEventError(pub &'static str);

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("invalid configuration document")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds an unusable value.
    #[error("environment variable {var} has invalid value `{value}`")]
    InvalidOverride {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_messaging_error_chain() {
        let io = std::io::Error::other("disk full");
        let err = MessagingError::new("write failed")
            .with_component("archiver")
            .with_cause(io);

        assert_eq!(err.to_string(), "write failed");
        assert_eq!(err.component(), Some("archiver"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_routing_error_display() {
        let err = RoutingError::new("dispatch failed", "vm://errors");
        assert_eq!(err.to_string(), "dispatch failed (endpoint: vm://errors)");
        assert_eq!(err.endpoint(), "vm://errors");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_access_error_converts_into_message_error() {
        let err: MessageError = AccessError::ImmutableWrite.into();
        assert!(matches!(err, MessageError::Access(AccessError::ImmutableWrite)));
    }
}
