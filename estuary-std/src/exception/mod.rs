//! Exception listener chain.
//!
//! When processing fails, an [`ExceptionListener`] takes over:
//!
//! 1. notify the context's [`Notifier`](estuary_core::Notifier), ignoring
//!    notifier failures
//! 2. log the error
//! 3. classify it with [`classify`]
//! 4. dispatch to the matching [`ExceptionStrategy`] method
//!
//! The default handling marks the request's transaction rollback-only,
//! attaches an [`ExceptionPayload`](estuary_core::ExceptionPayload) to the
//! current message and routes an [`ExceptionMessage`] to the first error
//! endpoint. Nothing escapes the listener: routing failures are logged.

mod listener;
mod message;

pub use listener::{DefaultExceptionStrategy, ExceptionListener, ExceptionStrategy, Failure};
pub use message::ExceptionMessage;

use estuary_core::{LifecycleError, MessagingError, RoutingError};
use std::error::Error;

/// The class of a failure, decided by its cause chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// A [`RoutingError`] is in the chain.
    Routing,
    /// A [`MessagingError`] is in the chain, but no [`RoutingError`].
    Messaging,
    /// A [`LifecycleError`] is the only framework error in the chain.
    Lifecycle,
    /// No framework error in the chain.
    Standard,
}

/// Walk `error` and its sources for the first `T`.
pub fn find_in_chain<'a, T: Error + 'static>(error: &'a (dyn Error + 'static)) -> Option<&'a T> {
    std::iter::successors(Some(error), |&e| e.source()).find_map(|e| e.downcast_ref::<T>())
}

/// Classify `error` by the framework errors in its cause chain.
///
/// Routing wins over messaging, which wins over lifecycle, regardless of
/// depth.
pub fn classify(error: &(dyn Error + 'static)) -> ExceptionKind {
    if find_in_chain::<RoutingError>(error).is_some() {
        ExceptionKind::Routing
    } else if find_in_chain::<MessagingError>(error).is_some() {
        ExceptionKind::Messaging
    } else if find_in_chain::<LifecycleError>(error).is_some() {
        ExceptionKind::Lifecycle
    } else {
        ExceptionKind::Standard
    }
}

/// The deepest framework error in the chain, or `error` itself.
pub(crate) fn root_framework_error<'a>(
    error: &'a (dyn Error + 'static),
) -> &'a (dyn Error + 'static) {
    std::iter::successors(Some(error), |&e| e.source())
        .filter(|e| e.is::<RoutingError>() || e.is::<MessagingError>() || e.is::<LifecycleError>())
        .last()
        .unwrap_or(error)
}
