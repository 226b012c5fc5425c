//! # estuary-core
//!
//! Core data model and traits for the Estuary service bus.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! transformers, processors and endpoints that don't need the full
//! `estuary-std` implementation.
//!
//! # Data Model
//!
//! - [`DataType`] - Runtime type, MIME type and encoding of a payload
//! - [`Payload`] - An optional, shared, type-erased value
//! - [`Message`] - A payload with scoped properties, attachments and an
//!   optional [`ExceptionPayload`]; simple or a collection of messages
//! - [`Session`] - Conversation state shared across events
//! - [`Event`] - A message in flight, with its session and flow variables
//! - [`EventOutcome`] - An event, or the absence of one
//!
//! # Seams
//!
//! - [`Transformer`] - Payload conversion
//! - [`TransformerLookup`] / [`DataTypeConversionResolver`] - Transformer discovery
//! - [`MessageProcessor`] - One processing step
//! - [`Endpoint`] - Outbound destination
//! - [`Transaction`] - Rollback marking
//! - [`Notifier`] - Exception notifications
//!
//! # Runtime Context
//!
//! [`EsbContext`] bundles the [`Configuration`] with the seams above and is
//! passed explicitly as `Arc<EsbContext>`.
//!
//! # Error Types
//!
//! - [`TransformerError`] - Conversion failures
//! - [`AccessError`] - Thread-ownership violations
//! - [`MessageError`] - Message API failures
//! - [`MessagingError`], [`RoutingError`], [`LifecycleError`] - Processing failures

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod access;
mod attachment;
mod config;
mod context;
mod data_type;
mod endpoint;
mod error;
mod event;
mod exception_payload;
mod message;
mod payload;
mod processor;
mod property;
mod session;
mod transaction;
mod transformer;

// Re-exports
pub use attachment::{Attachment, AttachmentContent};
pub use config::{AccessControlConfig, Configuration};
pub use context::{EsbContext, EsbContextBuilder, ExceptionNotification, NoopNotifier, Notifier};
pub use data_type::{DataType, TypeRef, mime};
pub use endpoint::{DynEndpoint, Endpoint};
pub use error::{
    AccessError, BoxError, ConfigError, LifecycleError, MessageError, MessagingError,
    RoutingError, TransformerError, VoidEventError,
};
pub use event::{
    Event, EventBuilder, EventOutcome, ExchangePattern, FlowConstruct, FlowVariables,
    ProcessingTime, ReplyToHandler,
};
pub use exception_payload::ExceptionPayload;
pub use message::{Message, MessageBuilder};
pub use payload::{NullPayload, Payload, PayloadStream};
pub use processor::{DynProcessor, MessageProcessor};
pub use property::{
    CaseInsensitiveMap, FromPropertyValue, PropertyScope, PropertyValue, ScopedPropertyStore,
    TypedProperty, names,
};
pub use session::{SecurityContext, Session};
pub use transaction::Transaction;
pub use transformer::{
    Capabilities, DataTypeConversionResolver, NoTransformers, TransformRequest, Transformed,
    Transformer, TransformerLookup,
};
