//! Processor applying a transformer chain.

use crate::transformation::{TransformationService, TransformerChain};
use estuary_core::{BoxError, Event, EventOutcome, MessageProcessor, MessagingError};

/// Applies a [`TransformerChain`] to the message of each event.
///
/// Failures surface as a [`MessagingError`] naming the chain.
#[derive(Debug)]
pub struct TransformerProcessor {
    service: TransformationService,
    chain: TransformerChain,
}

impl TransformerProcessor {
    /// Create the processor.
    pub fn new(service: TransformationService, chain: TransformerChain) -> Self {
        Self { service, chain }
    }

    /// The chain applied.
    pub fn chain(&self) -> &TransformerChain {
        &self.chain
    }
}

impl MessageProcessor for TransformerProcessor {
    async fn process(&self, mut event: Event) -> Result<EventOutcome, BoxError> {
        self.service
            .apply_to_event(&mut event, &self.chain)
            .map_err(|e| {
                MessagingError::new("transformation failed")
                    .with_component(format!("{:?}", self.chain))
                    .with_cause(e)
            })?;
        Ok(EventOutcome::Event(event))
    }
}
