//! Testing utilities for Estuary.
//!
//! Doubles for the seams of the runtime, all cheap to clone: clones share
//! their recorded state, so a test can keep one handle and give the other
//! away.
//!
//! # Features
//!
//! - [`RecordingEndpoint`]: An endpoint that keeps every event it receives
//! - [`FailingEndpoint`] / [`PanickingEndpoint`]: Endpoints that never deliver
//! - [`FnTransformer`]: A transformer built from a closure, counting calls
//! - [`RecordingNotifier`]: A notifier that keeps every notification
//! - [`MockTransaction`]: A transaction that records rollback marking
//! - [`RecordingProcessor`] / [`FailingProcessor`]: Processors for flow tests

use estuary_core::{
    BoxError, Capabilities, DataType, Endpoint, Event, EventOutcome, ExceptionNotification,
    MessageProcessor, Notifier, Payload, RoutingError, Transaction, TransformRequest, Transformed,
    Transformer, TransformerError,
};
use std::fmt;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use uuid::Uuid;

// ============================================================================
// Endpoints
// ============================================================================

/// An endpoint that records every event it receives.
///
/// # Example
///
/// ```rust,ignore
/// let errors = RecordingEndpoint::new("vm://errors");
/// let listener = ExceptionListener::new(ctx).endpoint(errors.clone());
///
/// // ... trigger a failure ...
///
/// assert_eq!(errors.count(), 1);
/// ```
#[derive(Clone)]
pub struct RecordingEndpoint {
    uri: String,
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingEndpoint {
    /// Create a recording endpoint.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of events received.
    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Remove and return the received events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl fmt::Debug for RecordingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingEndpoint")
            .field("uri", &self.uri)
            .field("count", &self.count())
            .finish()
    }
}

impl Endpoint for RecordingEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn send(&self, event: Event) -> Result<EventOutcome, BoxError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(EventOutcome::Void)
    }
}

/// An endpoint whose sends always fail with a [`RoutingError`].
#[derive(Debug, Clone)]
pub struct FailingEndpoint {
    uri: String,
    attempts: Arc<AtomicUsize>,
}

impl FailingEndpoint {
    /// Create a failing endpoint.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of send attempts.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Endpoint for FailingEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn send(&self, _event: Event) -> Result<EventOutcome, BoxError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Box::new(RoutingError::new("endpoint unavailable", &self.uri)))
    }
}

/// An endpoint that panics on send.
#[derive(Debug, Clone)]
pub struct PanickingEndpoint {
    uri: String,
}

impl PanickingEndpoint {
    /// Create a panicking endpoint.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl Endpoint for PanickingEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn send(&self, _event: Event) -> Result<EventOutcome, BoxError> {
        panic!("endpoint {} exploded", self.uri)
    }
}

// ============================================================================
// Transformers
// ============================================================================

type TransformFn = dyn Fn(&TransformRequest<'_>) -> Result<Payload, TransformerError> + Send + Sync;

/// A transformer backed by a closure.
///
/// Clones share the closure and the call counter.
///
/// # Example
///
/// ```rust,ignore
/// let upper = FnTransformer::builder("upper")
///     .source(DataType::of::<String>())
///     .returns(DataType::of::<String>())
///     .build(|req| Ok(Payload::new(req.payload().as_str().unwrap_or_default().to_uppercase())));
///
/// // ... run a chain containing upper.clone() ...
///
/// assert_eq!(upper.calls(), 1);
/// ```
#[derive(Clone)]
pub struct FnTransformer {
    name: String,
    sources: Vec<DataType>,
    returns: DataType,
    capabilities: Capabilities,
    f: Arc<TransformFn>,
    calls: Arc<AtomicUsize>,
}

impl FnTransformer {
    /// Start building a transformer named `name`.
    pub fn builder(name: impl Into<String>) -> FnTransformerBuilder {
        FnTransformerBuilder {
            name: name.into(),
            sources: Vec::new(),
            returns: DataType::object(),
            capabilities: Capabilities::empty(),
        }
    }

    /// Number of times the closure ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FnTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransformer")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("capabilities", &self.capabilities)
            .field("calls", &self.calls())
            .finish()
    }
}

impl Transformer for FnTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_data_types(&self) -> &[DataType] {
        &self.sources
    }

    fn return_data_type(&self) -> &DataType {
        &self.returns
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn transform(&self, request: &TransformRequest<'_>) -> Result<Transformed, TransformerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(request).map(Transformed::Value)
    }
}

/// Builder for [`FnTransformer`].
#[derive(Debug)]
#[must_use]
pub struct FnTransformerBuilder {
    name: String,
    sources: Vec<DataType>,
    returns: DataType,
    capabilities: Capabilities,
}

impl FnTransformerBuilder {
    /// Accept payloads of `data_type`. Without any source, everything is
    /// accepted.
    pub fn source(mut self, data_type: DataType) -> Self {
        self.sources.push(data_type);
        self
    }

    /// Declare the produced data type. Defaults to `object`.
    pub fn returns(mut self, data_type: DataType) -> Self {
        self.returns = data_type;
        self
    }

    /// Declare capabilities.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Finish with the transformation closure.
    pub fn build<F>(self, f: F) -> FnTransformer
    where
        F: Fn(&TransformRequest<'_>) -> Result<Payload, TransformerError> + Send + Sync + 'static,
    {
        FnTransformer {
            name: self.name,
            sources: self.sources,
            returns: self.returns,
            capabilities: self.capabilities,
            f: Arc::new(f),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

// ============================================================================
// Notifier and Transaction
// ============================================================================

/// A notifier that records notifications, optionally failing after
/// recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<ExceptionNotification>>>,
    fail: bool,
}

impl RecordingNotifier {
    /// A notifier that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records, then reports a failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Recorded notifications.
    pub fn notifications(&self) -> Vec<ExceptionNotification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of notifications.
    pub fn count(&self) -> usize {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &ExceptionNotification) -> Result<(), BoxError> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        if self.fail {
            return Err("notification backend unavailable".into());
        }
        Ok(())
    }
}

/// A transaction that records rollback marking.
#[derive(Debug)]
pub struct MockTransaction {
    id: String,
    rollback_only: AtomicBool,
    fail: bool,
}

impl MockTransaction {
    /// A transaction that can be marked.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rollback_only: AtomicBool::new(false),
            fail: false,
        }
    }

    /// A transaction whose marking fails.
    pub fn failing(id: impl Into<String>) -> Self {
        Self {
            fail: true,
            ..Self::new(id)
        }
    }
}

impl Transaction for MockTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_rollback_only(&self) -> Result<(), BoxError> {
        if self.fail {
            return Err(format!("transaction {} is no longer active", self.id).into());
        }
        self.rollback_only.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Processors
// ============================================================================

/// A processor that records the ids of the events it sees.
///
/// Appends its name to the `trail` flow variable, so tests can check
/// processing order.
#[derive(Debug, Clone)]
pub struct RecordingProcessor {
    name: String,
    seen: Arc<Mutex<Vec<Uuid>>>,
    void: bool,
}

impl RecordingProcessor {
    /// Name of the flow variable holding the trail.
    pub const TRAIL: &'static str = "trail";

    /// A processor that passes the event on.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Arc::new(Mutex::new(Vec::new())),
            void: false,
        }
    }

    /// A processor that consumes the event.
    pub fn void(name: impl Into<String>) -> Self {
        Self {
            void: true,
            ..Self::new(name)
        }
    }

    /// Ids of the events seen.
    pub fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of events seen.
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl MessageProcessor for RecordingProcessor {
    async fn process(&self, event: Event) -> Result<EventOutcome, BoxError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.id());
        let trail = match event.flow_variable(Self::TRAIL) {
            Some(previous) => format!("{previous},{}", self.name),
            None => self.name.clone(),
        };
        event.set_flow_variable(Self::TRAIL, Some(trail.into()));

        if self.void {
            return Ok(EventOutcome::Void);
        }
        Ok(EventOutcome::Event(event))
    }
}

type ErrorFn = dyn Fn() -> BoxError + Send + Sync;

/// A processor that always fails with the error its closure builds.
#[derive(Clone)]
pub struct FailingProcessor {
    error: Arc<ErrorFn>,
}

impl FailingProcessor {
    /// A processor failing with `error()`.
    pub fn new<F>(error: F) -> Self
    where
        F: Fn() -> BoxError + Send + Sync + 'static,
    {
        Self {
            error: Arc::new(error),
        }
    }
}

impl fmt::Debug for FailingProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingProcessor").finish_non_exhaustive()
    }
}

impl MessageProcessor for FailingProcessor {
    async fn process(&self, _event: Event) -> Result<EventOutcome, BoxError> {
        Err((self.error)())
    }
}
