#![cfg(feature = "macros")]

use estuary::registry::TransformerRegistry;
use estuary::{
    Capabilities, DataType, EsbContext, Message, MessageError, TransformationService,
    Transformer, TransformerChain, TransformerError, mime,
};
use std::convert::Infallible;
use std::sync::Arc;

#[estuary::converter(mime = "text/plain")]
fn int_to_text(value: &i64) -> Result<String, Infallible> {
    Ok(value.to_string())
}

#[estuary::transformer(name = "shout", ignore_bad_input = true)]
fn shout(text: &String, _encoding: &str) -> Result<String, Infallible> {
    Ok(text.to_uppercase())
}

#[estuary::transformer]
fn parse_int(text: &String) -> Result<i64, std::num::ParseIntError> {
    text.trim().parse()
}

#[test]
fn test_generated_metadata() {
    assert_eq!(int_to_text.name(), "int_to_text");
    assert!(int_to_text.capabilities().contains(Capabilities::CONVERTER));
    assert_eq!(int_to_text.source_data_types(), &[DataType::of::<i64>()]);
    assert_eq!(int_to_text.return_data_type().mime_type(), mime::TEXT_PLAIN);

    assert_eq!(shout.name(), "shout");
    assert_eq!(shout.capabilities(), Capabilities::IGNORE_BAD_INPUT);
    assert_eq!(parse_int.capabilities(), Capabilities::empty());
}

#[test]
fn test_generated_transformers_in_a_chain() {
    let ctx = EsbContext::builder()
        .transformers(Arc::new(TransformerRegistry::standard()))
        .build();
    let service = TransformationService::new(Arc::clone(&ctx));
    let chain = TransformerChain::new().then(parse_int).then(int_to_text);

    let result = service
        .apply_transformers(Message::new(" 42 ", ctx), None, &chain)
        .unwrap();

    assert_eq!(result.payload().as_str(), Some("42"));
    assert_eq!(result.data_type().mime_type(), mime::TEXT_PLAIN);
}

#[test]
fn test_function_error_becomes_transformer_failure() {
    let ctx = EsbContext::builder()
        .transformers(Arc::new(TransformerRegistry::standard()))
        .build();
    let service = TransformationService::new(Arc::clone(&ctx));

    let err = service
        .apply_transformers(
            Message::new("forty-two", ctx),
            None,
            &TransformerChain::new().then(parse_int),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        MessageError::Transformer(TransformerError::Failed { ref transformer, .. }) if transformer == "parse_int"
    ));
}

#[test]
fn test_converter_registered_for_lookup() {
    let registry = TransformerRegistry::builder()
        .register(int_to_text)
        .build();
    let ctx = EsbContext::builder().transformers(Arc::new(registry)).build();
    let mut message = Message::new(estuary::Payload::new(7_i64), ctx);

    let text = message.get_payload(&DataType::string()).unwrap();

    assert_eq!(text.as_str(), Some("7"));
}
