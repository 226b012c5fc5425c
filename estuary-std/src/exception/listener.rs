use super::{ExceptionKind, ExceptionMessage, classify, find_in_chain, root_framework_error};
use crate::request_context::RequestContext;
use estuary_core::{
    BoxError, DynEndpoint, Endpoint, EsbContext, Event, ExceptionNotification, ExceptionPayload,
    ExchangePattern, LifecycleError, Message, MessagingError, Payload, RoutingError,
};
use futures::FutureExt;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{debug, error, warn};

/// A classified failure, handed to an [`ExceptionStrategy`].
pub struct Failure<'a> {
    kind: ExceptionKind,
    error: Arc<dyn Error + Send + Sync + 'static>,
    endpoints: &'a [Arc<dyn DynEndpoint>],
    request: &'a mut RequestContext,
}

impl<'a> Failure<'a> {
    /// The error.
    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Its classification.
    pub fn kind(&self) -> ExceptionKind {
        self.kind
    }

    /// Error endpoints of the listener, in registration order.
    pub fn endpoints(&self) -> &[Arc<dyn DynEndpoint>] {
        self.endpoints
    }

    /// The request that failed.
    pub fn request_context(&mut self) -> &mut RequestContext {
        self.request
    }

    /// Mark the request's transaction rollback-only, if there is one.
    pub fn rollback_transaction(&self) {
        let Some(transaction) = self.request.transaction() else {
            return;
        };
        match transaction.set_rollback_only() {
            Ok(()) => debug!(transaction = transaction.id(), "transaction marked rollback-only"),
            Err(e) => warn!(
                transaction = transaction.id(),
                error = %e,
                "failed to mark transaction rollback-only"
            ),
        }
    }

    /// Attach an exception payload to the current message. Without a
    /// current event, one is created around a null-payload message.
    pub fn attach_exception_payload(&mut self) {
        if self.request.event().is_none() {
            let message = Message::null(Arc::clone(self.request.context()));
            self.request.share_reference(Event::builder(message).build());
        }
        let payload = ExceptionPayload::from_shared(Arc::clone(&self.error));
        if let Err(e) = self.request.set_exception_payload(payload) {
            warn!(error = %e, "failed to attach exception payload");
        }
    }

    /// Send an [`ExceptionMessage`] to the first error endpoint.
    ///
    /// Send errors and panics are logged, never returned.
    pub async fn route_exception(&self) {
        let Some((endpoint, skipped)) = self.endpoints.split_first() else {
            return;
        };
        if !skipped.is_empty() {
            debug!(
                endpoint = endpoint.uri(),
                skipped = skipped.len(),
                "routing exception to the first error endpoint only"
            );
        }

        let event = self.exception_event();
        match AssertUnwindSafe(endpoint.send_dyn(event)).catch_unwind().await {
            Ok(Ok(_)) => debug!(endpoint = endpoint.uri(), "exception message routed"),
            Ok(Err(e)) => error!(
                endpoint = endpoint.uri(),
                error = %e,
                original = %self.error,
                "failed to route exception message, possible message loss"
            ),
            Err(panic) => error!(
                endpoint = endpoint.uri(),
                panic = panic_message(panic.as_ref()),
                original = %self.error,
                "error endpoint panicked, possible message loss"
            ),
        }
    }

    /// Roll back, attach the exception payload and route the exception.
    pub async fn handle_default(mut self) {
        self.rollback_transaction();
        self.attach_exception_payload();
        self.route_exception().await;
    }

    fn exception_event(&self) -> Event {
        let context = Arc::clone(self.request.context());
        let current = self.request.event();
        let original = current
            .map(|e| {
                let message = e.message();
                message
                    .original_payload()
                    .unwrap_or_else(|| message.payload())
                    .clone()
            })
            .unwrap_or_else(Payload::null);
        let component = find_in_chain::<MessagingError>(self.error.as_ref())
            .and_then(MessagingError::component)
            .map(str::to_owned);
        let endpoint_uri = find_in_chain::<RoutingError>(self.error.as_ref())
            .map(|e| e.endpoint().to_owned())
            .or_else(|| current.and_then(Event::endpoint_uri).map(str::to_owned));

        let exception_message =
            ExceptionMessage::new(original, Arc::clone(&self.error), component, endpoint_uri);
        let mut message = Message::new(Payload::new(exception_message), context);
        let exception_payload = ExceptionPayload::from_shared(Arc::clone(&self.error));
        if let Err(e) = message.set_exception_payload(Some(exception_payload)) {
            warn!(error = %e, "failed to flag exception message");
        }
        if let Some(correlation_id) = current.and_then(|e| e.message().correlation_id()) {
            if let Err(e) = message.set_correlation_id(Some(&correlation_id)) {
                warn!(error = %e, "failed to copy correlation id to exception message");
            }
        }

        let mut builder = Event::builder(message).exchange_pattern(ExchangePattern::OneWay);
        if let Some(current) = current {
            builder = builder.session(current.session().clone());
            if let Some(flow) = current.flow_construct() {
                builder = builder.flow_construct(Arc::clone(flow));
            }
        }
        builder.build()
    }
}

impl fmt::Debug for Failure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.kind)
            .field("error", &self.error.to_string())
            .field("endpoints", &self.endpoints.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Per-kind handling of a failure.
///
/// Every method defaults to [`Failure::handle_default`]. Override one to
/// change how that kind of failure is handled.
///
/// # Example
///
/// ```rust,ignore
/// struct QuietRouting;
///
/// impl ExceptionStrategy for QuietRouting {
///     async fn handle_routing_exception(&self, mut failure: Failure<'_>) {
///         failure.attach_exception_payload();
///     }
/// }
/// ```
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not an exception strategy",
    label = "missing `ExceptionStrategy` implementation",
    note = "Implement `ExceptionStrategy`; every method has a default."
)]
pub trait ExceptionStrategy: Send + Sync + 'static {
    /// A [`RoutingError`] is in the chain.
    fn handle_routing_exception(&self, failure: Failure<'_>) -> impl Future<Output = ()> + Send {
        failure.handle_default()
    }

    /// A [`MessagingError`] is in the chain.
    fn handle_messaging_exception(&self, failure: Failure<'_>) -> impl Future<Output = ()> + Send {
        failure.handle_default()
    }

    /// A [`LifecycleError`] is in the chain.
    fn handle_lifecycle_exception(&self, failure: Failure<'_>) -> impl Future<Output = ()> + Send {
        failure.handle_default()
    }

    /// No framework error in the chain.
    fn handle_standard_exception(&self, failure: Failure<'_>) -> impl Future<Output = ()> + Send {
        failure.handle_default()
    }
}

/// Handles every kind of failure the default way.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionStrategy;

impl ExceptionStrategy for DefaultExceptionStrategy {}

/// Receives failures from processing and hands them to a strategy.
pub struct ExceptionListener<S = DefaultExceptionStrategy> {
    strategy: S,
    endpoints: Vec<Arc<dyn DynEndpoint>>,
    context: Arc<EsbContext>,
    initialised: AtomicBool,
    disposed: AtomicBool,
}

impl ExceptionListener {
    /// A listener using [`DefaultExceptionStrategy`].
    pub fn new(context: Arc<EsbContext>) -> Self {
        Self::with_strategy(context, DefaultExceptionStrategy)
    }
}

impl<S: ExceptionStrategy> ExceptionListener<S> {
    /// A listener using `strategy`.
    pub fn with_strategy(context: Arc<EsbContext>, strategy: S) -> Self {
        Self {
            strategy,
            endpoints: Vec::new(),
            context,
            initialised: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Add an error endpoint.
    pub fn endpoint<E: Endpoint>(self, endpoint: E) -> Self {
        self.endpoint_arc(Arc::new(endpoint))
    }

    /// Add a shared error endpoint.
    pub fn endpoint_arc(mut self, endpoint: Arc<dyn DynEndpoint>) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Error endpoints, in registration order.
    pub fn endpoints(&self) -> &[Arc<dyn DynEndpoint>] {
        &self.endpoints
    }

    /// The strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// The runtime context.
    pub fn context(&self) -> &Arc<EsbContext> {
        &self.context
    }

    /// Initialise the listener. Repeated calls do nothing; a disposed
    /// listener cannot be initialised.
    pub fn initialise(&self) -> Result<(), LifecycleError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(LifecycleError::new("exception listener", "initialise")
                .with_cause("listener already disposed"));
        }
        if !self.initialised.swap(true, Ordering::AcqRel) {
            debug!(endpoints = self.endpoints.len(), "exception listener initialised");
        }
        Ok(())
    }

    /// Whether [`initialise`](Self::initialise) has run.
    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    /// Dispose of the listener. Repeated calls do nothing.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            debug!("exception listener disposed");
        }
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Handle a failure of the request in `request`.
    ///
    /// Never fails: notifier errors, routing errors and strategy panics are
    /// logged.
    pub async fn exception_thrown(
        &self,
        request: &mut RequestContext,
        error: BoxError,
    ) -> ExceptionKind {
        let error: Arc<dyn Error + Send + Sync + 'static> = Arc::from(error);
        self.notify(error.as_ref());

        let kind = classify(error.as_ref());
        let root = root_framework_error(error.as_ref());
        error!(kind = ?kind, error = %root, "exception caught");

        let failure = Failure {
            kind,
            error: Arc::clone(&error),
            endpoints: &self.endpoints,
            request,
        };
        let dispatch = async {
            match kind {
                ExceptionKind::Routing => self.strategy.handle_routing_exception(failure).await,
                ExceptionKind::Messaging => self.strategy.handle_messaging_exception(failure).await,
                ExceptionKind::Lifecycle => self.strategy.handle_lifecycle_exception(failure).await,
                ExceptionKind::Standard => self.strategy.handle_standard_exception(failure).await,
            }
        };
        if let Err(panic) = AssertUnwindSafe(dispatch).catch_unwind().await {
            error!(
                kind = ?kind,
                panic = panic_message(panic.as_ref()),
                original = %error,
                "exception strategy panicked, possible message loss"
            );
        }
        kind
    }

    fn notify(&self, error: &(dyn Error + 'static)) {
        let notification = ExceptionNotification {
            description: error.to_string(),
            component: find_in_chain::<MessagingError>(error)
                .and_then(MessagingError::component)
                .map(str::to_owned),
            raised_at: SystemTime::now(),
        };
        let notifier = self.context.notifier();
        match std::panic::catch_unwind(AssertUnwindSafe(|| notifier.notify(&notification))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "exception notification failed"),
            Err(panic) => warn!(
                panic = panic_message(panic.as_ref()),
                "exception notifier panicked"
            ),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ExceptionListener<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionListener")
            .field("strategy", &self.strategy)
            .field(
                "endpoints",
                &self.endpoints.iter().map(|e| e.uri()).collect::<Vec<_>>(),
            )
            .field("initialised", &self.initialised.load(Ordering::Relaxed))
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}
