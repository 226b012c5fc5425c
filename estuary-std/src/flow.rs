//! Processor chains and flows.
//!
//! A [`ProcessorChain`] runs [`MessageProcessor`]s in order, handing each
//! the event the previous one returned. The chain ends early on a void
//! outcome or when a processor sets `stop_further_processing`.
//!
//! A [`Flow`] wraps a chain with an [`ExceptionListener`]. Processing
//! failures never reach the caller of [`Flow::process`]: the listener
//! handles them and the caller receives the last event seen, carrying an
//! exception payload.
//!
//! ```rust,ignore
//! let flow = Flow::builder("orders", ctx)
//!     .processor(LoggingProcessor::new("received"))
//!     .processor(TransformerProcessor::new(service, chain))
//!     .error_endpoint(errors)
//!     .build();
//!
//! let outcome = flow.process(flow.new_event(message, ExchangePattern::OneWay)).await;
//! ```

use crate::exception::{DefaultExceptionStrategy, ExceptionListener, ExceptionStrategy};
use crate::request_context::RequestContext;
use estuary_core::{
    BoxError, DynEndpoint, DynProcessor, Endpoint, EsbContext, Event, EventOutcome,
    ExchangePattern, FlowConstruct, LifecycleError, Message, MessageProcessor,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Processors run in order.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn DynProcessor>>,
}

impl ProcessorChain {
    /// Start building a chain.
    pub fn builder() -> ProcessorChainBuilder {
        ProcessorChainBuilder::default()
    }

    /// Number of processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run the chain.
    ///
    /// `request` holds a snapshot of the event as each processor received
    /// it, so that a failure can be reported against it.
    pub async fn process(
        &self,
        request: &mut RequestContext,
        mut event: Event,
    ) -> Result<EventOutcome, BoxError> {
        for (index, processor) in self.processors.iter().enumerate() {
            request.snapshot(&event);
            match (**processor).process_dyn(event).await? {
                EventOutcome::Event(next) if next.is_stop_further_processing() => {
                    debug!(index, "processing stopped by processor");
                    return Ok(EventOutcome::Event(next));
                }
                EventOutcome::Event(next) => event = next,
                outcome => {
                    debug!(index, non_blocking = outcome.is_non_blocking(), "void outcome ends chain");
                    return Ok(outcome);
                }
            }
        }
        Ok(EventOutcome::Event(event))
    }
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.processors.len())
            .finish()
    }
}

/// Builder for [`ProcessorChain`].
#[derive(Default)]
#[must_use]
pub struct ProcessorChainBuilder {
    processors: Vec<Box<dyn DynProcessor>>,
}

impl ProcessorChainBuilder {
    /// Append a processor.
    pub fn processor<P: MessageProcessor>(mut self, processor: P) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Append a boxed processor.
    pub fn processor_boxed(mut self, processor: Box<dyn DynProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Build the chain.
    pub fn build(self) -> ProcessorChain {
        ProcessorChain {
            processors: self.processors,
        }
    }
}

/// A named processor chain with exception handling.
pub struct Flow<S = DefaultExceptionStrategy> {
    construct: Arc<FlowConstruct>,
    chain: ProcessorChain,
    exception_listener: ExceptionListener<S>,
    context: Arc<EsbContext>,
}

impl Flow {
    /// Start building a flow.
    pub fn builder(name: impl Into<String>, context: Arc<EsbContext>) -> FlowBuilder {
        FlowBuilder::new(name, context)
    }
}

impl<S: ExceptionStrategy> Flow<S> {
    /// Flow name.
    pub fn name(&self) -> &str {
        self.construct.name()
    }

    /// The flow construct stamped on events.
    pub fn construct(&self) -> &Arc<FlowConstruct> {
        &self.construct
    }

    /// The exception listener.
    pub fn exception_listener(&self) -> &ExceptionListener<S> {
        &self.exception_listener
    }

    /// The runtime context.
    pub fn context(&self) -> &Arc<EsbContext> {
        &self.context
    }

    /// Initialise the exception listener.
    pub fn initialise(&self) -> Result<(), LifecycleError> {
        self.exception_listener.initialise()
    }

    /// Dispose of the exception listener.
    pub fn dispose(&self) {
        self.exception_listener.dispose();
    }

    /// A new event for `message` belonging to this flow.
    pub fn new_event(&self, message: Message, exchange_pattern: ExchangePattern) -> Event {
        Event::builder(message)
            .flow_construct(Arc::clone(&self.construct))
            .exchange_pattern(exchange_pattern)
            .build()
    }

    /// Process `event` with a fresh request context.
    pub async fn process(&self, event: Event) -> EventOutcome {
        let mut request = RequestContext::new(Arc::clone(&self.context));
        self.process_with(&mut request, event).await
    }

    /// Process `event` within `request`.
    ///
    /// A processor failure goes to the exception listener; the returned
    /// outcome is then the event the failing processor received, with an
    /// exception payload attached.
    #[instrument(level = "debug", skip_all, fields(flow = %self.construct.name(), event = %event.id()))]
    pub async fn process_with(&self, request: &mut RequestContext, event: Event) -> EventOutcome {
        match self.chain.process(request, event).await {
            Ok(outcome) => {
                request.clear();
                outcome
            }
            Err(error) => {
                let kind = self.exception_listener.exception_thrown(request, error).await;
                debug!(kind = ?kind, "processing failed, returning exception-flagged event");
                match request.take_event() {
                    Some(event) => EventOutcome::Event(event),
                    None => EventOutcome::Void,
                }
            }
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Flow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("construct", &self.construct)
            .field("chain", &self.chain)
            .field("exception_listener", &self.exception_listener)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Flow`].
#[must_use]
pub struct FlowBuilder<S = DefaultExceptionStrategy> {
    name: String,
    synchronous: bool,
    context: Arc<EsbContext>,
    chain: ProcessorChainBuilder,
    strategy: S,
    endpoints: Vec<Arc<dyn DynEndpoint>>,
}

impl FlowBuilder {
    /// Create a builder using [`DefaultExceptionStrategy`].
    pub fn new(name: impl Into<String>, context: Arc<EsbContext>) -> Self {
        Self {
            name: name.into(),
            synchronous: false,
            context,
            chain: ProcessorChainBuilder::default(),
            strategy: DefaultExceptionStrategy,
            endpoints: Vec::new(),
        }
    }
}

impl<S: ExceptionStrategy> FlowBuilder<S> {
    /// Make every event of the flow synchronous.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Append a processor.
    pub fn processor<P: MessageProcessor>(mut self, processor: P) -> Self {
        self.chain = self.chain.processor(processor);
        self
    }

    /// Add an error endpoint.
    pub fn error_endpoint<E: Endpoint>(mut self, endpoint: E) -> Self {
        self.endpoints.push(Arc::new(endpoint));
        self
    }

    /// Handle failures with `strategy`.
    pub fn exception_strategy<T: ExceptionStrategy>(self, strategy: T) -> FlowBuilder<T> {
        FlowBuilder {
            name: self.name,
            synchronous: self.synchronous,
            context: self.context,
            chain: self.chain,
            strategy,
            endpoints: self.endpoints,
        }
    }

    /// Build the flow.
    pub fn build(self) -> Flow<S> {
        let listener = self.endpoints.into_iter().fold(
            ExceptionListener::with_strategy(Arc::clone(&self.context), self.strategy),
            |listener, endpoint| listener.endpoint_arc(endpoint),
        );
        Flow {
            construct: Arc::new(FlowConstruct::new(self.name, self.synchronous)),
            chain: self.chain.build(),
            exception_listener: listener,
            context: self.context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingProcessor, RecordingEndpoint, RecordingProcessor};
    use estuary_core::{Configuration, MessagingError, PropertyValue};

    fn context() -> Arc<EsbContext> {
        EsbContext::new(Configuration::default())
    }

    fn trail(event: &Event) -> Option<String> {
        event
            .flow_variable(RecordingProcessor::TRAIL)
            .as_ref()
            .and_then(PropertyValue::as_str)
            .map(str::to_owned)
    }

    #[tokio::test]
    async fn test_processors_run_in_order() {
        let ctx = context();
        let flow = Flow::builder("orders", Arc::clone(&ctx))
            .processor(RecordingProcessor::new("a"))
            .processor(RecordingProcessor::new("b"))
            .build();

        let event = flow.new_event(Message::new("x", ctx), ExchangePattern::OneWay);
        let outcome = flow.process(event).await;
        assert_eq!(trail(outcome.event().unwrap()).as_deref(), Some("a,b"));
    }

    #[tokio::test]
    async fn test_boxed_processors_dispatch_to_inner() {
        let ctx = context();
        let boxed: Box<dyn DynProcessor> = Box::new(RecordingProcessor::new("boxed"));
        let wrapped: Box<dyn DynProcessor> = Box::new(RecordingProcessor::new("wrapped"));
        let chain = ProcessorChain::builder()
            .processor_boxed(boxed)
            .processor(wrapped)
            .build();
        let mut request = RequestContext::new(Arc::clone(&ctx));

        let event = Event::builder(Message::new("x", ctx)).build();
        let outcome = chain.process(&mut request, event).await.unwrap();
        assert_eq!(trail(outcome.event().unwrap()).as_deref(), Some("boxed,wrapped"));
    }

    #[tokio::test]
    async fn test_void_outcome_stops_chain() {
        let ctx = context();
        let after = RecordingProcessor::new("after");
        let flow = Flow::builder("orders", Arc::clone(&ctx))
            .processor(RecordingProcessor::void("sink"))
            .processor(after.clone())
            .build();

        let event = flow.new_event(Message::new("x", ctx), ExchangePattern::OneWay);
        assert!(flow.process(event).await.is_void());
        assert_eq!(after.count(), 0);
    }

    #[tokio::test]
    async fn test_stop_further_processing() {
        let ctx = context();
        let after = RecordingProcessor::new("after");
        let chain = ProcessorChain::builder()
            .processor(StopProcessor)
            .processor(after.clone())
            .build();
        let mut request = RequestContext::new(Arc::clone(&ctx));

        let event = Event::builder(Message::new("x", ctx)).build();
        let outcome = chain.process(&mut request, event).await.unwrap();
        assert!(outcome.event().unwrap().is_stop_further_processing());
        assert_eq!(after.count(), 0);
    }

    struct StopProcessor;

    impl MessageProcessor for StopProcessor {
        async fn process(&self, mut event: Event) -> Result<EventOutcome, BoxError> {
            event.set_stop_further_processing(true);
            Ok(EventOutcome::Event(event))
        }
    }

    #[tokio::test]
    async fn test_failure_returns_flagged_event() {
        let ctx = context();
        let errors = RecordingEndpoint::new("vm://errors");
        let flow = Flow::builder("orders", Arc::clone(&ctx))
            .processor(RecordingProcessor::new("a"))
            .processor(FailingProcessor::new(|| {
                MessagingError::new("validation failed")
                    .with_component("validator")
                    .into()
            }))
            .error_endpoint(errors.clone())
            .build();
        flow.initialise().unwrap();

        let event = flow.new_event(Message::new("x", ctx), ExchangePattern::RequestResponse);
        let id = event.id();
        let outcome = flow.process(event).await;

        let event = outcome.event().unwrap();
        assert_eq!(event.id(), id);
        assert_eq!(trail(event).as_deref(), Some("a"));
        let payload = event.message().exception_payload().unwrap();
        assert_eq!(payload.message(), "validation failed");
        assert_eq!(errors.count(), 1);
    }

    #[tokio::test]
    async fn test_request_cleared_after_success() {
        let ctx = context();
        let flow = Flow::builder("orders", Arc::clone(&ctx))
            .processor(RecordingProcessor::new("a"))
            .build();
        let mut request = RequestContext::new(Arc::clone(&ctx));

        let event = flow.new_event(Message::new("x", ctx), ExchangePattern::OneWay);
        let outcome = flow.process_with(&mut request, event).await;
        assert!(!outcome.is_void());
        assert!(request.event().is_none());
    }

    #[test]
    fn test_synchronous_flow_makes_synchronous_events() {
        let ctx = context();
        let flow = Flow::builder("sync", Arc::clone(&ctx))
            .synchronous(true)
            .build();
        let event = flow.new_event(Message::new("x", ctx), ExchangePattern::OneWay);
        assert!(event.is_synchronous());
        assert_eq!(event.flow_construct().map(|f| f.name()), Some("sync"));
    }
}
