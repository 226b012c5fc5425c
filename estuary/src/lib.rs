//! # estuary - Message and Event Core of a Service Bus
//!
//! `estuary` carries payloads through a service bus: typed messages with
//! scoped properties and attachments, events tying a message to a session
//! and flow variables, a transformation engine converting payloads between
//! data types, and an exception listener routing failures to error
//! endpoints.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use estuary::prelude::*;
//! use std::sync::Arc;
//!
//! let context = EsbContext::builder()
//!     .transformers(Arc::new(TransformerRegistry::standard()))
//!     .build();
//!
//! let flow = Flow::builder("orders", Arc::clone(&context))
//!     .processor(LoggingProcessor::new("inbound"))
//!     .error_endpoint(my_dead_letter_queue)
//!     .build();
//!
//! let event = flow.new_event(Message::new("hello", context), ExchangePattern::OneWay);
//! let outcome = flow.process(event).await;
//! ```
//!
//! ## Crates
//!
//! - `estuary-core`: data model and seams, re-exported at the root
//! - `estuary-std`: registry, transformation engine, flows, exception
//!   listener and wire format, re-exported by module
//! - `estuary-macros`: `#[converter]` and `#[transformer]` (feature `macros`)

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use estuary_core::{
    // Errors
    AccessError,
    // Data model
    Attachment,
    AttachmentContent,
    BoxError,
    // Seams
    Capabilities,
    // Configuration
    Configuration,
    ConfigError,
    DataType,
    DataTypeConversionResolver,
    DynEndpoint,
    DynProcessor,
    Endpoint,
    // Runtime context
    EsbContext,
    EsbContextBuilder,
    Event,
    EventBuilder,
    EventOutcome,
    ExceptionNotification,
    ExceptionPayload,
    ExchangePattern,
    FlowConstruct,
    FlowVariables,
    FromPropertyValue,
    LifecycleError,
    Message,
    MessageBuilder,
    MessageError,
    MessageProcessor,
    MessagingError,
    NoTransformers,
    NoopNotifier,
    Notifier,
    NullPayload,
    Payload,
    PayloadStream,
    ProcessingTime,
    PropertyScope,
    PropertyValue,
    ReplyToHandler,
    RoutingError,
    SecurityContext,
    Session,
    Transaction,
    TransformRequest,
    Transformed,
    Transformer,
    TransformerError,
    TransformerLookup,
    TypeRef,
    TypedProperty,
    VoidEventError,
    mime,
    names,
};

pub use estuary_std::{
    exception::{ExceptionKind, ExceptionListener, ExceptionMessage, ExceptionStrategy},
    flow::{Flow, FlowBuilder},
    registry::TransformerRegistry,
    request_context::RequestContext,
    transformation::{TransformationService, TransformerChain},
};

/// Standard converters and charset helpers.
pub mod converters {
    pub use estuary_std::converters::{CharsetError, decode, encode, standard_converters};
}

/// Transformer registry.
pub mod registry {
    pub use estuary_std::registry::{TransformerRegistry, TransformerRegistryBuilder};
}

/// Exception listener, strategies and error classification.
pub mod exception {
    pub use estuary_std::exception::{
        DefaultExceptionStrategy, ExceptionKind, ExceptionListener, ExceptionMessage,
        ExceptionStrategy, Failure, classify, find_in_chain,
    };
}

/// Flows and processor chains.
pub mod flow {
    pub use estuary_std::flow::{Flow, FlowBuilder, ProcessorChain, ProcessorChainBuilder};
}

/// Standard processors.
pub mod processors {
    pub use estuary_std::processors::{LoggingProcessor, TransformerProcessor};
}

/// Binary serialization of messages and events.
pub mod wire {
    pub use estuary_std::wire::{
        DetachedEvent, DetachedMessage, RemoteError, WireError, decode_event, decode_message,
        encode_event, encode_message,
    };
}

/// Testing utilities.
pub mod testing {
    #![allow(clippy::wildcard_imports)]
    pub use estuary_std::testing::*;
}

/// Prelude module - common imports for Estuary.
///
/// # Usage
///
/// ```rust,ignore
/// use estuary::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Errors
        BoxError,
        // Data model
        DataType,
        Endpoint,
        // Runtime
        EsbContext,
        Event,
        EventOutcome,
        ExchangePattern,
        Flow,
        Message,
        MessageError,
        MessageProcessor,
        Payload,
        PropertyScope,
        PropertyValue,
        RequestContext,
        Session,
        TransformationService,
        // Transformation
        Transformer,
        TransformerChain,
        TransformerRegistry,
        processors::{LoggingProcessor, TransformerProcessor},
    };
}

#[cfg(feature = "macros")]
pub use estuary_macros::{converter, transformer};
