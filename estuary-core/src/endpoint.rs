//! # Outbound Endpoints
//!
//! An [`Endpoint`] delivers an event to a destination identified by a URI.
//! Transports live outside this crate; the runtime only needs this seam to
//! route exception messages to error endpoints.

use crate::error::BoxError;
use crate::event::{Event, EventOutcome};
use std::{future::Future, pin::Pin};

/// A destination for events.
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement `Endpoint`",
    label = "missing `Endpoint` implementation",
    note = "Endpoints must implement `uri` and `send`."
)]
pub trait Endpoint: Send + Sync + 'static {
    /// Address of the destination.
    fn uri(&self) -> &str;

    /// Deliver an event.
    fn send(&self, event: Event) -> impl Future<Output = Result<EventOutcome, BoxError>> + Send;
}

/// Dynamic object-safe version of [`Endpoint`].
pub trait DynEndpoint: Send + Sync + 'static {
    /// Address of the destination.
    fn uri(&self) -> &str;

    /// Deliver an event (dynamic dispatch version).
    fn send_dyn<'a>(
        &'a self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<EventOutcome, BoxError>> + Send + 'a>>;
}

impl<T: Endpoint> DynEndpoint for T {
    fn uri(&self) -> &str {
        Endpoint::uri(self)
    }

    fn send_dyn<'a>(
        &'a self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<EventOutcome, BoxError>> + Send + 'a>> {
        Box::pin(self.send(event))
    }
}
