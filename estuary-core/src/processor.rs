//! # Message Processors
//!
//! A [`MessageProcessor`] is one step of a flow. It takes ownership of an
//! event and either hands back an event for the next step, or ends
//! processing with a void outcome.
//!
//! # Static vs Dynamic Dispatch
//!
//! This trait uses native `async fn` for zero-cost static dispatch.
//! For dynamic dispatch (e.g., in processor chains), use [`DynProcessor`].

use crate::error::BoxError;
use crate::event::{Event, EventOutcome};
use std::{future::Future, pin::Pin};

/// One processing step.
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement `MessageProcessor`",
    label = "missing `MessageProcessor` implementation",
    note = "Processors must implement `process`, taking an `Event` and returning an `EventOutcome`."
)]
pub trait MessageProcessor: Send + Sync + 'static {
    /// Process an event.
    fn process(&self, event: Event) -> impl Future<Output = Result<EventOutcome, BoxError>> + Send;
}

/// Dynamic object-safe version of [`MessageProcessor`].
pub trait DynProcessor: Send + Sync + 'static {
    /// Process an event (dynamic dispatch version).
    fn process_dyn<'a>(
        &'a self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<EventOutcome, BoxError>> + Send + 'a>>;
}

// Blanket implementation: any MessageProcessor is a DynProcessor.
impl<T: MessageProcessor> DynProcessor for T {
    fn process_dyn<'a>(
        &'a self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<EventOutcome, BoxError>> + Send + 'a>> {
        Box::pin(self.process(event))
    }
}

// Allow Box<dyn DynProcessor> to be used where MessageProcessor is expected.
impl MessageProcessor for Box<dyn DynProcessor> {
    async fn process(&self, event: Event) -> Result<EventOutcome, BoxError> {
        (**self).process_dyn(event).await
    }
}
