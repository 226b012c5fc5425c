//! The event currently being processed.
//!
//! A [`RequestContext`] is threaded through a processing call by `&mut` and
//! holds at most one event. [`RequestContext::snapshot`] stores a thread copy
//! of the event, so later writes by the caller are not visible here.
//! [`RequestContext::share_reference`] stores the event itself and is the
//! faster choice when the caller hands the event over for good.

use estuary_core::{EsbContext, Event, ExceptionPayload, Message, MessageError, Transaction};
use std::sync::Arc;

/// Per-request state passed explicitly through processing.
#[derive(Debug)]
pub struct RequestContext {
    context: Arc<EsbContext>,
    event: Option<Event>,
    transaction: Option<Arc<dyn Transaction>>,
}

impl RequestContext {
    /// An empty request context.
    pub fn new(context: Arc<EsbContext>) -> Self {
        Self {
            context,
            event: None,
            transaction: None,
        }
    }

    /// Attach the active transaction.
    pub fn with_transaction(mut self, transaction: Arc<dyn Transaction>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// The runtime context.
    pub fn context(&self) -> &Arc<EsbContext> {
        &self.context
    }

    /// Store a thread copy of `event`.
    pub fn snapshot(&mut self, event: &Event) {
        self.event = Some(event.new_thread_copy());
    }

    /// Store `event` itself.
    pub fn share_reference(&mut self, event: Event) {
        self.event = Some(event);
    }

    /// The current event.
    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    /// The current event, mutably.
    pub fn event_mut(&mut self) -> Option<&mut Event> {
        self.event.as_mut()
    }

    /// Remove and return the current event.
    pub fn take_event(&mut self) -> Option<Event> {
        self.event.take()
    }

    /// Forget the current event.
    pub fn clear(&mut self) {
        self.event = None;
    }

    /// Replace the message of the current event, keeping the event's id,
    /// session and flow variables. Without a current event, a new one-way
    /// event is created around `message`.
    pub fn rewrite_message(&mut self, message: Message) {
        match self.event.take() {
            Some(current) => {
                self.event = Some(Event::rewrite(message, &current, true));
            }
            None => {
                self.event = Some(Event::builder(message).build());
            }
        }
    }

    /// Attach `payload` to the current message. Returns `false` when there
    /// is no current event.
    pub fn set_exception_payload(
        &mut self,
        payload: ExceptionPayload,
    ) -> Result<bool, MessageError> {
        let Some(event) = self.event.as_mut() else {
            return Ok(false);
        };
        event.message_mut().set_exception_payload(Some(payload))?;
        Ok(true)
    }

    /// The active transaction.
    pub fn transaction(&self) -> Option<&Arc<dyn Transaction>> {
        self.transaction.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estuary_core::{Configuration, ExchangePattern, Session};

    fn event(ctx: &Arc<EsbContext>) -> Event {
        Event::new(
            Message::new("payload", Arc::clone(ctx)),
            ExchangePattern::OneWay,
            Session::new(),
        )
    }

    #[test]
    fn test_snapshot_is_independent() {
        let ctx = EsbContext::new(Configuration::default());
        let mut rc = RequestContext::new(Arc::clone(&ctx));
        let mut original = event(&ctx);

        rc.snapshot(&original);
        original.message_mut().set_invocation_property("k", "v").unwrap();
        original.set_flow_variable("var", Some("x".into()));

        let stored = rc.event().unwrap();
        assert_eq!(stored.id(), original.id());
        assert!(stored.message().invocation_property("k").is_none());
        assert!(stored.flow_variable("var").is_none());
        assert!(stored.session().ptr_eq(original.session()));
    }

    #[test]
    fn test_share_reference_keeps_event() {
        let ctx = EsbContext::new(Configuration::default());
        let mut rc = RequestContext::new(Arc::clone(&ctx));
        let original = event(&ctx);
        let vars = original.flow_variables().clone();

        rc.share_reference(original);
        rc.event().unwrap().set_flow_variable("var", Some("x".into()));
        assert_eq!(vars.get("var").map(|v| v.to_string()), Some("x".to_owned()));
    }

    #[test]
    fn test_rewrite_message_keeps_identity() {
        let ctx = EsbContext::new(Configuration::default());
        let mut rc = RequestContext::new(Arc::clone(&ctx));
        let original = event(&ctx);
        let id = original.id();
        rc.share_reference(original);

        rc.rewrite_message(Message::new("next", Arc::clone(&ctx)));
        let current = rc.event().unwrap();
        assert_eq!(current.id(), id);
        assert_eq!(current.message().payload().as_str(), Some("next"));
    }

    #[test]
    fn test_exception_payload_without_event() {
        let ctx = EsbContext::new(Configuration::default());
        let mut rc = RequestContext::new(ctx);
        let attached = rc
            .set_exception_payload(ExceptionPayload::new("boom".into()))
            .unwrap();
        assert!(!attached);
        assert!(rc.take_event().is_none());
    }
}
