//! Logging processor for event observation.

use estuary_core::{BoxError, Event, EventOutcome, MessageProcessor};
use tracing::info;

/// A processor that logs each event and passes it on.
///
/// A stream payload is read to be logged and replaced by its text.
#[derive(Debug, Clone)]
pub struct LoggingProcessor {
    label: String,
}

impl LoggingProcessor {
    /// Create a logging processor. `label` prefixes every line.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl MessageProcessor for LoggingProcessor {
    async fn process(&self, mut event: Event) -> Result<EventOutcome, BoxError> {
        let payload = event.message_mut().payload_for_logging();
        let correlation_id = event.message().correlation_id();
        info!(
            label = %self.label,
            event = %event.id(),
            message = %event.message().id(),
            correlation_id = correlation_id.as_deref(),
            %payload,
            "processing event"
        );
        Ok(EventOutcome::Event(event))
    }
}
