use estuary::exception::Failure;
use estuary::processors::TransformerProcessor;
use estuary::testing::{
    FailingEndpoint, FailingProcessor, MockTransaction, PanickingEndpoint, RecordingEndpoint,
    RecordingNotifier, RecordingProcessor,
};
use estuary::{
    Configuration, EsbContext, EventOutcome, ExceptionKind, ExceptionListener, ExceptionMessage,
    ExceptionStrategy, ExchangePattern, Flow, Message, MessagingError, RequestContext,
    RoutingError, Transaction, TransformationService, TransformerChain, TransformerRegistry,
};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

mod common;
use common::{context, int_to_text};

#[derive(Debug)]
struct Wrapper(Box<dyn Error + Send + Sync>);

impl fmt::Display for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wrapped: {}", self.0)
    }
}

impl Error for Wrapper {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.0.as_ref())
    }
}

#[derive(Default)]
struct RecordingStrategy {
    handled: Mutex<Vec<&'static str>>,
}

impl RecordingStrategy {
    fn record(&self, kind: &'static str) {
        self.handled.lock().unwrap().push(kind);
    }
}

impl ExceptionStrategy for RecordingStrategy {
    async fn handle_routing_exception(&self, failure: Failure<'_>) {
        self.record("routing");
        failure.handle_default().await;
    }

    async fn handle_messaging_exception(&self, failure: Failure<'_>) {
        self.record("messaging");
        failure.handle_default().await;
    }

    async fn handle_standard_exception(&self, failure: Failure<'_>) {
        self.record("standard");
        failure.handle_default().await;
    }
}

#[tokio::test]
async fn test_routing_error_found_two_levels_deep() {
    let ctx = context();
    let errors = RecordingEndpoint::new("vm://errors");
    let listener = ExceptionListener::with_strategy(Arc::clone(&ctx), RecordingStrategy::default())
        .endpoint(errors.clone());
    let mut request = RequestContext::new(Arc::clone(&ctx));
    request.share_reference(estuary::Event::builder(Message::new("order", ctx)).build());

    let error = Wrapper(Box::new(Wrapper(Box::new(RoutingError::new(
        "no route",
        "jms://orders",
    )))));
    let kind = listener.exception_thrown(&mut request, Box::new(error)).await;

    assert_eq!(kind, ExceptionKind::Routing);
    assert_eq!(*listener.strategy().handled.lock().unwrap(), vec!["routing"]);

    let routed = errors.take();
    assert_eq!(routed.len(), 1);
    let report = routed[0]
        .message()
        .payload()
        .downcast_ref::<ExceptionMessage>()
        .unwrap();
    assert_eq!(report.endpoint_uri(), Some("jms://orders"));
    assert_eq!(report.payload().as_str(), Some("order"));
}

#[tokio::test]
async fn test_plain_error_is_standard() {
    let ctx = context();
    let listener = ExceptionListener::with_strategy(Arc::clone(&ctx), RecordingStrategy::default());
    let mut request = RequestContext::new(ctx);

    let kind = listener
        .exception_thrown(&mut request, "disk full".into())
        .await;

    assert_eq!(kind, ExceptionKind::Standard);
    assert_eq!(*listener.strategy().handled.lock().unwrap(), vec!["standard"]);
    let message = request.event().unwrap().message();
    assert!(message.payload().is_null());
    assert_eq!(message.exception_payload().unwrap().message(), "disk full");
}

#[tokio::test]
async fn test_flow_returns_event_flagged_with_exception() {
    let ctx = context();
    let errors = RecordingEndpoint::new("vm://errors");
    let before = RecordingProcessor::new("before");
    let after = RecordingProcessor::new("after");
    let flow = Flow::builder("orders", Arc::clone(&ctx))
        .processor(before.clone())
        .processor(FailingProcessor::new(|| {
            Box::new(MessagingError::new("validation failed").with_component("validator"))
        }))
        .processor(after.clone())
        .error_endpoint(errors.clone())
        .build();

    let event = flow.new_event(Message::new("payload", ctx), ExchangePattern::RequestResponse);
    let id = event.id();
    let outcome = flow.process(event).await;

    let returned = outcome.into_event().unwrap();
    assert_eq!(returned.id(), id);
    assert_eq!(
        returned.message().exception_payload().unwrap().message(),
        "validation failed"
    );
    assert_eq!(before.count(), 1);
    assert_eq!(after.count(), 0);

    let routed = errors.take();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].exchange_pattern(), ExchangePattern::OneWay);
    let report = routed[0]
        .message()
        .payload()
        .downcast_ref::<ExceptionMessage>()
        .unwrap();
    assert_eq!(report.component_name(), Some("validator"));
    assert_eq!(report.payload().as_str(), Some("payload"));
}

#[tokio::test]
async fn test_transformation_failure_is_a_messaging_error() {
    let ctx = EsbContext::builder()
        .configuration(Configuration::default())
        .transformers(Arc::new(TransformerRegistry::builder().build()))
        .build();
    let errors = RecordingEndpoint::new("vm://errors");
    let service = TransformationService::new(Arc::clone(&ctx));
    let chain = TransformerChain::new().then(int_to_text(estuary::Capabilities::empty()));
    let flow = Flow::builder("convert", Arc::clone(&ctx))
        .processor(TransformerProcessor::new(service, chain))
        .error_endpoint(errors.clone())
        .exception_strategy(RecordingStrategy::default())
        .build();

    let event = flow.new_event(Message::new("not a number", ctx), ExchangePattern::OneWay);
    let outcome = flow.process(event).await;

    assert!(!outcome.is_void());
    assert_eq!(
        *flow.exception_listener().strategy().handled.lock().unwrap(),
        vec!["messaging"]
    );
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn test_only_first_error_endpoint_receives_message() {
    let ctx = context();
    let first = RecordingEndpoint::new("vm://first");
    let second = RecordingEndpoint::new("vm://second");
    let listener = ExceptionListener::new(Arc::clone(&ctx))
        .endpoint(first.clone())
        .endpoint(second.clone());
    let mut request = RequestContext::new(ctx);

    listener.exception_thrown(&mut request, "boom".into()).await;

    assert_eq!(first.count(), 1);
    assert_eq!(second.count(), 0);
}

#[tokio::test]
async fn test_dispatch_failures_are_swallowed() {
    let ctx = context();
    let failing = FailingEndpoint::new("vm://down");
    let flow = Flow::builder("fragile", Arc::clone(&ctx))
        .processor(FailingProcessor::new(|| "first failure".into()))
        .error_endpoint(failing.clone())
        .build();

    let outcome = flow
        .process(flow.new_event(Message::new("x", Arc::clone(&ctx)), ExchangePattern::OneWay))
        .await;
    assert!(matches!(outcome, EventOutcome::Event(_)));
    assert_eq!(failing.attempts(), 1);

    let panicking = Flow::builder("explosive", Arc::clone(&ctx))
        .processor(FailingProcessor::new(|| "second failure".into()))
        .error_endpoint(PanickingEndpoint::new("vm://panic"))
        .build();
    let outcome = panicking
        .process(panicking.new_event(Message::new("y", ctx), ExchangePattern::OneWay))
        .await;
    assert!(matches!(outcome, EventOutcome::Event(_)));
}

#[tokio::test]
async fn test_rollback_and_notification() {
    let notifier = RecordingNotifier::new();
    let ctx = EsbContext::builder()
        .transformers(Arc::new(TransformerRegistry::standard()))
        .notifier(Arc::new(notifier.clone()))
        .build();
    let transaction = Arc::new(MockTransaction::new("tx-1"));
    let listener = ExceptionListener::new(Arc::clone(&ctx));
    let mut request = RequestContext::new(ctx).with_transaction(transaction.clone());

    listener.exception_thrown(&mut request, "boom".into()).await;

    assert!(transaction.is_rollback_only());
    assert_eq!(notifier.count(), 1);
    assert_eq!(notifier.notifications()[0].description, "boom");
}
