use estuary::testing::FnTransformer;
use estuary::{
    AccessError, DataType, EsbContext, Event, ExchangePattern, Message, MessageError, Payload,
    PayloadStream, PropertyScope, PropertyValue, Session, TransformerRegistry, names,
};
use std::sync::Arc;

mod common;
use common::context;

// ============================================================================
// Property scoping
// ============================================================================

#[test]
fn test_scopes_are_isolated() {
    let mut message = Message::new("payload", context());

    message.set_invocation_property("key", "invocation").unwrap();
    assert!(message.outbound_property("key").is_none());
    assert!(message.inbound_property("key").is_none());

    message.set_outbound_property("other", 1_i64).unwrap();
    assert!(message.invocation_property("other").is_none());
    assert!(message.inbound_property("other").is_none());

    assert_eq!(
        message.invocation_property("key").as_ref().and_then(PropertyValue::as_str),
        Some("invocation")
    );
}

#[test]
fn test_property_keys_ignore_case() {
    let mut message = Message::new("payload", context());
    message.set_outbound_property("Content-Type", "text/plain").unwrap();

    assert!(message.outbound_property("content-type").is_some());
    assert_eq!(message.property_names(PropertyScope::Outbound), vec!["Content-Type"]);
}

#[test]
fn test_null_removes_property() {
    let mut message = Message::new("payload", context());
    message.set_outbound_property("gone", "soon").unwrap();

    message.set_property("gone", None, PropertyScope::Outbound).unwrap();

    assert!(message.outbound_property("gone").is_none());
    assert!(!message
        .property_names(PropertyScope::Outbound)
        .iter()
        .any(|name| name == "gone"));
}

#[test]
fn test_session_scope_needs_a_session() {
    let mut message = Message::new("payload", context());
    let err = message.set_session_property("user", "ana").unwrap_err();
    assert!(matches!(err, MessageError::NoActiveSession { key } if key == "user"));

    let session = Session::new();
    let event = Event::new(message, ExchangePattern::OneWay, session.clone());
    let mut message = event.into_message();
    message.set_session_property("user", "ana").unwrap();
    assert_eq!(session.property("user").as_ref().and_then(PropertyValue::as_str), Some("ana"));
}

#[test]
fn test_correlation_id_falls_back_to_inbound() {
    let mut message = Message::builder("payload", context())
        .inbound_property(names::CORRELATION_ID, "from-inbound")
        .build();

    message.set_correlation_id(Some("abc")).unwrap();
    assert_eq!(message.correlation_id().as_deref(), Some("abc"));
    assert!(message.outbound_property(names::CORRELATION_ID).is_some());

    message.clear_properties(PropertyScope::Outbound).unwrap();
    assert_eq!(message.correlation_id().as_deref(), Some("from-inbound"));
}

// ============================================================================
// Payload conversion
// ============================================================================

#[test]
fn test_compatible_payload_returned_without_conversion() {
    let counting = FnTransformer::builder("string-copy")
        .source(DataType::string())
        .returns(DataType::string())
        .build(|request| Ok(Payload::new(request.payload().as_str().unwrap_or_default().to_owned())));
    let registry = TransformerRegistry::builder().register(counting.clone()).build();
    let ctx = EsbContext::builder().transformers(Arc::new(registry)).build();
    let mut message = Message::new("hello", ctx);

    let payload = message.get_payload(&DataType::string()).unwrap();

    assert!(payload.ptr_eq(message.payload()));
    assert_eq!(counting.calls(), 0);
}

#[test]
fn test_string_converted_to_bytes() {
    let mut message = Message::builder("hello", context())
        .data_type(DataType::string().with_encoding("UTF-8"))
        .build();
    let before = message.payload().clone();

    let payload = message.get_payload(&DataType::bytes()).unwrap();

    assert_eq!(payload.as_bytes(), Some(&b"hello"[..]));
    assert!(message.payload().ptr_eq(&before));
}

#[test]
fn test_stream_payload_replaced_after_conversion() {
    let mut message = Message::new(PayloadStream::from_bytes(b"hello".to_vec()), context());

    let payload = message.get_payload(&DataType::bytes()).unwrap();

    assert_eq!(payload.as_bytes(), Some(&b"hello"[..]));
    assert_eq!(message.payload().as_bytes(), Some(&b"hello"[..]));
    assert_eq!(message.payload_as_string(None).unwrap(), "hello");
}

#[test]
fn test_missing_converter_is_reported() {
    #[derive(Debug)]
    struct Opaque;

    let mut message = Message::new(Payload::new(Opaque), context());
    let err = message.get_payload(&DataType::bytes()).unwrap_err();
    assert!(matches!(err, MessageError::Transformer(_)));
    assert!(message.payload().is::<Opaque>());
}

// ============================================================================
// Thread ownership
// ============================================================================

#[test]
fn test_single_writer_enforcement() {
    let mut message = Message::new("payload", context());
    message.set_invocation_property("first", 1_i64).unwrap();

    let from_other_thread = std::thread::scope(|scope| {
        scope
            .spawn(|| message.set_invocation_property("second", 2_i64))
            .join()
            .unwrap()
    });
    assert!(matches!(
        from_other_thread,
        Err(MessageError::Access(AccessError::NonOwnerWrite { .. }))
    ));

    message.set_invocation_property("third", 3_i64).unwrap();

    let mut copy = message.new_thread_copy();
    std::thread::spawn(move || copy.set_invocation_property("fourth", 4_i64))
        .join()
        .unwrap()
        .unwrap();
}

#[test]
fn test_immutable_message_rejects_writes() {
    let mut message = Message::new("payload", context());
    message.mark_immutable();

    let err = message.set_outbound_property("k", "v").unwrap_err();
    assert!(matches!(err, MessageError::Access(AccessError::ImmutableWrite)));
}

// ============================================================================
// Collections
// ============================================================================

#[test]
fn test_collection_invalidation_is_one_way() {
    let ctx = context();
    let mut collection = Message::collection(
        vec![Message::new("a", Arc::clone(&ctx)), Message::new("b", Arc::clone(&ctx))],
        Arc::clone(&ctx),
    );
    assert!(collection.is_collection());
    assert_eq!(collection.message_count().unwrap(), 2);

    collection.set_payload("flat").unwrap();

    assert!(collection.is_invalidated_payload());
    assert!(!collection.is_collection());
    assert!(matches!(
        collection.add_message(Message::new("c", Arc::clone(&ctx))),
        Err(MessageError::InvalidatedCollection)
    ));
    assert!(matches!(
        collection.messages_as_array(),
        Err(MessageError::InvalidatedCollection)
    ));

    collection.set_payload("again").unwrap();
    assert!(collection.is_invalidated_payload());
}

#[test]
fn test_collection_payload_lists_members() {
    let ctx = context();
    let mut collection = Message::collection(vec![Message::new("a", Arc::clone(&ctx))], Arc::clone(&ctx));
    collection.add_message(Message::new("b", Arc::clone(&ctx))).unwrap();

    let payloads = collection.payload().downcast_ref::<Vec<Payload>>().unwrap();
    let texts: Vec<_> = payloads.iter().filter_map(Payload::as_str).collect();
    assert_eq!(texts, vec!["a", "b"]);
    assert!(matches!(
        collection.payload_as_bytes(),
        Err(MessageError::Unsupported(_))
    ));
}
