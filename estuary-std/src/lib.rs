//! # estuary-std
//!
//! Standard implementations for the Estuary service bus core.
//!
//! This crate provides:
//! - **Conversion**: the [`standard converters`](converters) and a
//!   [`TransformerRegistry`](registry::TransformerRegistry) to look them up
//! - **Transformation**: [`TransformationService`](transformation::TransformationService)
//!   applying [`TransformerChain`](transformation::TransformerChain)s
//! - **Request context**: [`RequestContext`](request_context::RequestContext),
//!   the event in flight for one unit of work
//! - **Exception handling**: [`ExceptionListener`](exception::ExceptionListener)
//!   with pluggable [`ExceptionStrategy`](exception::ExceptionStrategy)
//! - **Flows**: [`Flow`](flow::Flow) running a processor chain with an
//!   exception listener, plus the [standard processors](processors)
//! - **Wire format**: [`wire`] serialization of messages and events
//! - **Test doubles**: [`testing`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use estuary_core;

pub mod converters;
pub mod exception;
pub mod flow;
pub mod processors;
pub mod registry;
pub mod request_context;
pub mod testing;
pub mod transformation;
pub mod wire;
