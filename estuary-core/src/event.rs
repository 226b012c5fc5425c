//! # Events
//!
//! An [`Event`] is one unit of work moving through a flow: a [`Message`],
//! the [`Session`] it belongs to, flow variables and routing metadata.
//!
//! Events are created once per inbound message and then *rewritten* each
//! time a processor replaces the message: a rewrite keeps the id, session,
//! timeout and processing time of its template.
//!
//! Processing a step may produce no event at all; [`EventOutcome`] models
//! that case instead of a sentinel event.

use crate::data_type::DataType;
use crate::error::{BoxError, MessageError, VoidEventError};
use crate::message::Message;
use crate::payload::Payload;
use crate::property::{CaseInsensitiveMap, PropertyScope, PropertyValue, TypedProperty, names};
use crate::session::Session;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Whether the sender waits for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum ExchangePattern {
    /// Fire and forget.
    #[default]
    OneWay,
    /// The sender waits for a reply.
    RequestResponse,
}

impl ExchangePattern {
    /// Whether a reply is expected.
    pub fn has_response(&self) -> bool {
        matches!(self, Self::RequestResponse)
    }
}

/// The owning flow, as seen by events and sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConstruct {
    name: String,
    synchronous: bool,
}

impl FlowConstruct {
    /// Describe a flow.
    pub fn new(name: impl Into<String>, synchronous: bool) -> Self {
        Self {
            name: name.into(),
            synchronous,
        }
    }

    /// Flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the flow processes every event synchronously.
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }
}

/// Sends a reply to the destination named by an event.
pub trait ReplyToHandler: Send + Sync + fmt::Debug {
    /// Deliver `event` to `destination`.
    fn process_reply_to(&self, event: &Event, destination: &PropertyValue) -> Result<(), BoxError>;
}

/// When processing of an event started.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingTime {
    started: Instant,
}

impl ProcessingTime {
    /// Start measuring now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// When measurement started.
    pub fn started_at(&self) -> Instant {
        self.started
    }

    /// Time elapsed since the start.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Variables scoped to one pass through a flow.
///
/// Clones share storage; use [`FlowVariables::deep_copy`] for an
/// independent set.
#[derive(Clone, Default)]
pub struct FlowVariables(Arc<RwLock<CaseInsensitiveMap<TypedProperty>>>);

impl FlowVariables {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// An independent copy.
    pub fn deep_copy(&self) -> Self {
        let entries = self.0.read().unwrap_or_else(PoisonError::into_inner).clone();
        Self(Arc::new(RwLock::new(entries)))
    }

    /// Whether both handles share storage.
    pub fn ptr_eq(&self, other: &FlowVariables) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Store a variable. `None` or a null value removes it.
    pub fn set(&self, key: &str, value: Option<PropertyValue>, data_type: Option<DataType>) {
        let mut entries = self.0.write().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(value) if !value.is_null() => {
                entries.insert(key, TypedProperty::new(value, data_type));
            }
            _ => {
                entries.remove(key);
            }
        }
    }

    /// A copy of a variable.
    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.typed(key).map(|p| p.value)
    }

    /// A copy of a variable with its data type.
    pub fn typed(&self, key: &str) -> Option<TypedProperty> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Remove a variable.
    pub fn remove(&self, key: &str) -> Option<PropertyValue> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|p| p.value)
    }

    /// Variable names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(str::to_owned)
            .collect();
        names.sort();
        names
    }

    /// Remove every variable.
    pub fn clear(&self) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl fmt::Debug for FlowVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FlowVariables").field(&self.names()).finish()
    }
}

/// A message in flight.
pub struct Event {
    id: Uuid,
    message: Message,
    session: Session,
    flow_construct: Option<Arc<FlowConstruct>>,
    exchange_pattern: ExchangePattern,
    timeout: Option<Duration>,
    synchronous: bool,
    transacted: bool,
    stop_further_processing: bool,
    flow_variables: FlowVariables,
    reply_to_handler: Option<Arc<dyn ReplyToHandler>>,
    reply_to_destination: Option<PropertyValue>,
    endpoint_uri: Option<String>,
    processing_time: ProcessingTime,
}

impl Event {
    /// A new event for `message`.
    pub fn new(message: Message, exchange_pattern: ExchangePattern, session: Session) -> Self {
        Self::builder(message)
            .exchange_pattern(exchange_pattern)
            .session(session)
            .build()
    }

    /// Start building an event.
    pub fn builder(message: Message) -> EventBuilder {
        EventBuilder::new(message)
    }

    /// An event carrying `message` in place of the template's message.
    ///
    /// Keeps the template's id, session, timeout, processing time and
    /// routing metadata. Flow variables are shared with the template or
    /// copied.
    pub fn rewrite(message: Message, template: &Event, share_flow_variables: bool) -> Self {
        let flow_variables = if share_flow_variables {
            template.flow_variables.clone()
        } else {
            template.flow_variables.deep_copy()
        };
        Self::from_template(message, template, template.session.clone(), flow_variables)
    }

    /// An independent copy: thread copy of the message, copy of the session,
    /// copy of the flow variables, same id.
    pub fn copy(event: &Event) -> Self {
        Self::from_template(
            event.message.new_thread_copy(),
            event,
            Session::copy_of(&event.session),
            event.flow_variables.deep_copy(),
        )
    }

    /// A copy that another thread may claim. The session stays shared.
    pub fn new_thread_copy(&self) -> Self {
        Self::from_template(
            self.message.new_thread_copy(),
            self,
            self.session.clone(),
            self.flow_variables.deep_copy(),
        )
    }

    fn from_template(
        mut message: Message,
        template: &Event,
        session: Session,
        flow_variables: FlowVariables,
    ) -> Self {
        message.bind_session(session.clone());
        Self {
            id: template.id,
            message,
            session,
            flow_construct: template.flow_construct.clone(),
            exchange_pattern: template.exchange_pattern,
            timeout: template.timeout,
            synchronous: template.synchronous,
            transacted: template.transacted,
            stop_further_processing: false,
            flow_variables,
            reply_to_handler: template.reply_to_handler.clone(),
            reply_to_destination: template.reply_to_destination.clone(),
            endpoint_uri: template.endpoint_uri.clone(),
            processing_time: template.processing_time,
        }
    }

    /// Event id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The message, mutably.
    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Replace the message, binding it to this event's session.
    pub fn set_message(&mut self, mut message: Message) {
        message.bind_session(self.session.clone());
        self.message = message;
    }

    /// Take the message out of the event.
    pub fn into_message(self) -> Message {
        self.message
    }

    /// The session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The owning flow.
    pub fn flow_construct(&self) -> Option<&Arc<FlowConstruct>> {
        self.flow_construct.as_ref()
    }

    /// Exchange pattern.
    pub fn exchange_pattern(&self) -> ExchangePattern {
        self.exchange_pattern
    }

    /// Whether the event is processed synchronously. Fixed at construction.
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Whether the event runs inside a transaction.
    pub fn is_transacted(&self) -> bool {
        self.transacted
    }

    /// How long to wait for a response. `None` waits forever.
    pub fn timeout(&self) -> Option<Duration> {
        let context = self.message.context();
        if context.is_disable_timeouts() {
            return None;
        }
        Some(
            self.timeout
                .unwrap_or_else(|| context.default_response_timeout()),
        )
    }

    /// The timeout set on this event, without the configured default.
    pub fn explicit_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set an explicit timeout. `None` falls back to the configured default.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// URI of the endpoint the event arrived on.
    pub fn endpoint_uri(&self) -> Option<&str> {
        self.endpoint_uri.as_deref()
    }

    /// Reply handler.
    pub fn reply_to_handler(&self) -> Option<&Arc<dyn ReplyToHandler>> {
        self.reply_to_handler.as_ref()
    }

    /// Reply destination.
    pub fn reply_to_destination(&self) -> Option<&PropertyValue> {
        self.reply_to_destination.as_ref()
    }

    /// When processing started.
    pub fn processing_time(&self) -> ProcessingTime {
        self.processing_time
    }

    /// Whether later processors should be skipped.
    pub fn is_stop_further_processing(&self) -> bool {
        self.stop_further_processing
    }

    /// Skip (or stop skipping) later processors.
    pub fn set_stop_further_processing(&mut self, stop: bool) {
        self.stop_further_processing = stop;
    }

    /// Encoding of the message.
    pub fn encoding(&self) -> String {
        self.message.encoding()
    }

    /// The message payload converted to `target`.
    pub fn transform_message(&mut self, target: &DataType) -> Result<Payload, MessageError> {
        self.message.get_payload(target)
    }

    /// The message payload converted to `T`.
    pub fn transform_message_as<T: Any + Send + Sync>(&mut self) -> Result<Arc<T>, MessageError> {
        self.message.get_payload_as::<T>()
    }

    /// The message payload as bytes.
    pub fn message_as_bytes(&mut self) -> Result<Vec<u8>, MessageError> {
        self.message.payload_as_bytes()
    }

    /// The message payload as text.
    pub fn message_as_string(&mut self, encoding: Option<&str>) -> Result<String, MessageError> {
        self.message.payload_as_string(encoding)
    }

    // ------------------------------------------------------------------
    // Flow variables
    // ------------------------------------------------------------------

    /// The flow variables.
    pub fn flow_variables(&self) -> &FlowVariables {
        &self.flow_variables
    }

    /// Store a flow variable. `None` removes it.
    pub fn set_flow_variable(&self, key: &str, value: Option<PropertyValue>) {
        self.flow_variables.set(key, value, None);
    }

    /// Store a flow variable with an explicit data type.
    pub fn set_flow_variable_with_type(&self, key: &str, value: PropertyValue, data_type: DataType) {
        self.flow_variables.set(key, Some(value), Some(data_type));
    }

    /// A flow variable.
    pub fn flow_variable(&self, key: &str) -> Option<PropertyValue> {
        self.flow_variables.get(key)
    }

    /// Data type of a flow variable.
    pub fn flow_variable_data_type(&self, key: &str) -> Option<DataType> {
        self.flow_variables.typed(key).map(|p| p.data_type)
    }

    /// Remove a flow variable.
    pub fn remove_flow_variable(&self, key: &str) -> Option<PropertyValue> {
        self.flow_variables.remove(key)
    }

    /// Flow variable names, sorted.
    pub fn flow_variable_names(&self) -> Vec<String> {
        self.flow_variables.names()
    }

    /// Remove every flow variable.
    pub fn clear_flow_variables(&self) {
        self.flow_variables.clear();
    }

    // ------------------------------------------------------------------
    // Session variables
    // ------------------------------------------------------------------

    /// Store a session variable. `None` removes it.
    pub fn set_session_variable(&self, key: &str, value: Option<PropertyValue>) {
        self.session.set_property(key, value);
    }

    /// A session variable.
    pub fn session_variable(&self, key: &str) -> Option<PropertyValue> {
        self.session.property(key)
    }

    /// Remove a session variable.
    pub fn remove_session_variable(&self, key: &str) -> Option<PropertyValue> {
        self.session.remove_property(key)
    }

    /// Session variable names, sorted.
    pub fn session_variable_names(&self) -> Vec<String> {
        self.session.property_names()
    }

    /// Remove every session variable.
    pub fn clear_session_variables(&self) {
        self.session.clear_properties();
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("message", &self.message)
            .field("session", &self.session.id())
            .field(
                "flow",
                &self.flow_construct.as_ref().map(|fc| fc.name().to_owned()),
            )
            .field("exchange_pattern", &self.exchange_pattern)
            .field("synchronous", &self.synchronous)
            .field("endpoint_uri", &self.endpoint_uri)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Event`].
#[must_use]
pub struct EventBuilder {
    message: Message,
    id: Option<Uuid>,
    exchange_pattern: ExchangePattern,
    session: Option<Session>,
    flow_construct: Option<Arc<FlowConstruct>>,
    transacted: bool,
    timeout: Option<Duration>,
    endpoint_uri: Option<String>,
    reply_to_handler: Option<Arc<dyn ReplyToHandler>>,
    reply_to_destination: Option<PropertyValue>,
    flow_variables: Option<FlowVariables>,
}

impl EventBuilder {
    fn new(message: Message) -> Self {
        Self {
            message,
            id: None,
            exchange_pattern: ExchangePattern::default(),
            session: None,
            flow_construct: None,
            transacted: false,
            timeout: None,
            endpoint_uri: None,
            reply_to_handler: None,
            reply_to_destination: None,
            flow_variables: None,
        }
    }

    /// Use a fixed id.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the exchange pattern.
    pub fn exchange_pattern(mut self, exchange_pattern: ExchangePattern) -> Self {
        self.exchange_pattern = exchange_pattern;
        self
    }

    /// Join an existing session.
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the owning flow.
    pub fn flow_construct(mut self, flow_construct: Arc<FlowConstruct>) -> Self {
        self.flow_construct = Some(flow_construct);
        self
    }

    /// Mark the event as transacted.
    pub fn transacted(mut self, transacted: bool) -> Self {
        self.transacted = transacted;
        self
    }

    /// Set an explicit timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the endpoint the event arrived on.
    pub fn endpoint_uri(mut self, uri: impl Into<String>) -> Self {
        self.endpoint_uri = Some(uri.into());
        self
    }

    /// Set where and how to reply.
    pub fn reply_to(mut self, handler: Arc<dyn ReplyToHandler>, destination: PropertyValue) -> Self {
        self.reply_to_handler = Some(handler);
        self.reply_to_destination = Some(destination);
        self
    }

    /// Start with existing flow variables.
    pub fn flow_variables(mut self, flow_variables: FlowVariables) -> Self {
        self.flow_variables = Some(flow_variables);
        self
    }

    /// Finish.
    ///
    /// The event is synchronous when it is transacted, its flow is
    /// synchronous, its exchange pattern expects a response, or the message
    /// carries a true inbound force-sync property.
    pub fn build(self) -> Event {
        let session = match (self.session, &self.flow_construct) {
            (Some(session), _) => session,
            (None, Some(flow_construct)) => Session::for_flow(Arc::clone(flow_construct)),
            (None, None) => Session::new(),
        };
        let forced_sync = self
            .message
            .property_or(names::FORCE_SYNC, PropertyScope::Inbound, false)
            .unwrap_or(false);
        let synchronous = self.transacted
            || self
                .flow_construct
                .as_ref()
                .is_some_and(|fc| fc.is_synchronous())
            || self.exchange_pattern.has_response()
            || forced_sync;

        let mut message = self.message;
        message.bind_session(session.clone());

        Event {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            message,
            session,
            flow_construct: self.flow_construct,
            exchange_pattern: self.exchange_pattern,
            timeout: self.timeout,
            synchronous,
            transacted: self.transacted,
            stop_further_processing: false,
            flow_variables: self.flow_variables.unwrap_or_default(),
            reply_to_handler: self.reply_to_handler,
            reply_to_destination: self.reply_to_destination,
            endpoint_uri: self.endpoint_uri,
            processing_time: ProcessingTime::start(),
        }
    }
}

/// Result of processing an event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Processing produced an event.
    Event(Event),
    /// Processing ended without a response.
    Void,
    /// Processing continues asynchronously; the response arrives later.
    NonBlockingVoid,
}

impl EventOutcome {
    /// Whether no event was produced.
    pub fn is_void(&self) -> bool {
        !matches!(self, Self::Event(_))
    }

    /// Whether processing continues asynchronously.
    pub fn is_non_blocking(&self) -> bool {
        matches!(self, Self::NonBlockingVoid)
    }

    /// The event.
    pub fn event(&self) -> Result<&Event, VoidEventError> {
        match self {
            Self::Event(event) => Ok(event),
            _ => Err(VoidEventError("event")),
        }
    }

    /// The event, mutably.
    pub fn event_mut(&mut self) -> Result<&mut Event, VoidEventError> {
        match self {
            Self::Event(event) => Ok(event),
            _ => Err(VoidEventError("event_mut")),
        }
    }

    /// Take the event.
    pub fn into_event(self) -> Result<Event, VoidEventError> {
        match self {
            Self::Event(event) => Ok(event),
            _ => Err(VoidEventError("into_event")),
        }
    }

    /// The event's message.
    pub fn message(&self) -> Result<&Message, VoidEventError> {
        match self {
            Self::Event(event) => Ok(event.message()),
            _ => Err(VoidEventError("message")),
        }
    }
}

impl From<Event> for EventOutcome {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::context::EsbContext;

    fn context_with(configuration: Configuration) -> Arc<EsbContext> {
        EsbContext::new(configuration)
    }

    fn message(payload: &str) -> Message {
        Message::new(payload, context_with(Configuration::default()))
    }

    #[test]
    fn test_synchronous_flags() {
        let one_way = Event::new(message("a"), ExchangePattern::OneWay, Session::new());
        assert!(!one_way.is_synchronous());

        let request = Event::new(message("a"), ExchangePattern::RequestResponse, Session::new());
        assert!(request.is_synchronous());

        let transacted = Event::builder(message("a")).transacted(true).build();
        assert!(transacted.is_synchronous());

        let flow = Arc::new(FlowConstruct::new("orders", true));
        let in_flow = Event::builder(message("a")).flow_construct(flow).build();
        assert!(in_flow.is_synchronous());
        assert!(in_flow.session().flow_construct().is_some());

        let forced = Message::builder("a", context_with(Configuration::default()))
            .inbound_property(names::FORCE_SYNC, "true")
            .build();
        assert!(Event::builder(forced).build().is_synchronous());
    }

    #[test]
    fn test_timeout_resolution() {
        let mut event = Event::new(message("a"), ExchangePattern::OneWay, Session::new());
        assert_eq!(event.timeout(), Some(Duration::from_secs(10)));

        event.set_timeout(Some(Duration::from_millis(250)));
        assert_eq!(event.timeout(), Some(Duration::from_millis(250)));

        let disabled = Configuration {
            disable_timeouts: true,
            ..Configuration::default()
        };
        let event = Event::builder(Message::new("a", context_with(disabled)))
            .timeout(Duration::from_secs(1))
            .build();
        assert_eq!(event.timeout(), None);
    }

    #[test]
    fn test_rewrite_keeps_identity_and_shares_variables() {
        let template = Event::builder(message("a"))
            .timeout(Duration::from_secs(3))
            .build();
        template.set_flow_variable("v", Some(1.into()));

        let shared = Event::rewrite(message("b"), &template, true);
        assert_eq!(shared.id(), template.id());
        assert!(shared.session().ptr_eq(template.session()));
        assert_eq!(shared.timeout(), Some(Duration::from_secs(3)));
        assert!(shared.flow_variables().ptr_eq(template.flow_variables()));

        let copied = Event::rewrite(message("c"), &template, false);
        copied.set_flow_variable("v", Some(2.into()));
        assert_eq!(template.flow_variable("v"), Some(1.into()));
    }

    #[test]
    fn test_rewrite_binds_session_to_new_message() {
        let template = Event::new(message("a"), ExchangePattern::OneWay, Session::new());
        let mut event = Event::rewrite(message("b"), &template, true);

        event.message_mut().set_session_property("user", "ada").unwrap();
        assert_eq!(template.session_variable("user"), Some("ada".into()));
    }

    #[test]
    fn test_copy_detaches_session() {
        let event = Event::new(message("a"), ExchangePattern::OneWay, Session::new());
        event.set_session_variable("k", Some("v".into()));

        let copy = Event::copy(&event);
        copy.set_session_variable("k", Some("changed".into()));

        assert_eq!(copy.id(), event.id());
        assert_eq!(copy.session().id(), event.session().id());
        assert_eq!(event.session_variable("k"), Some("v".into()));
    }

    #[test]
    fn test_thread_copy_shares_session_but_not_variables() {
        let event = Event::new(message("a"), ExchangePattern::OneWay, Session::new());
        event.set_flow_variable("f", Some(1.into()));

        let copy = event.new_thread_copy();
        copy.set_flow_variable("f", Some(2.into()));
        copy.set_session_variable("s", Some(true.into()));

        assert_eq!(event.flow_variable("f"), Some(1.into()));
        assert_eq!(event.session_variable("s"), Some(true.into()));
    }

    #[test]
    fn test_void_outcome_accessors_fail() {
        let outcome = EventOutcome::Void;
        assert!(outcome.is_void());
        assert_eq!(outcome.event().unwrap_err(), VoidEventError("event"));
        assert!(EventOutcome::NonBlockingVoid.is_non_blocking());

        let event = Event::new(message("a"), ExchangePattern::OneWay, Session::new());
        let outcome = EventOutcome::from(event);
        assert_eq!(outcome.message().unwrap().payload().as_str(), Some("a"));
    }
}
