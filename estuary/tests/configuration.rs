use estuary::{Configuration, DataType, EsbContext, Message, TransformationService, TransformerChain};
use std::sync::Arc;

mod common;
use common::{context_with, upper};

#[test]
fn test_document_drives_message_behaviour() {
    let configuration = Configuration::from_toml_str(
        r#"
        default_encoding = "ISO-8859-1"
        use_extended_transformations = false

        [access_control]
        fail_on_message_scribbling = false
        "#,
    )
    .unwrap();
    let ctx = context_with(configuration);
    let mut message = Message::new("payload", Arc::clone(&ctx));

    assert_eq!(message.encoding(), "ISO-8859-1");

    message.set_invocation_property("owner", "main").unwrap();
    let from_other_thread = std::thread::scope(|scope| {
        scope
            .spawn(|| message.set_invocation_property("intruder", "other"))
            .join()
            .unwrap()
    });
    assert!(from_other_thread.is_ok());

    let service = TransformationService::new(ctx);
    let bytes = Message::new(b"raw".to_vec(), Arc::clone(service.context()));
    let result = service
        .apply_transformers(bytes, None, &TransformerChain::new().then(upper()))
        .unwrap();
    assert!(result.payload().is::<Vec<u8>>());
}

#[test]
fn test_environment_overrides_apply_on_top_of_document() {
    let configuration = Configuration::from_toml_str(r#"default_encoding = "UTF-16""#)
        .unwrap()
        .with_overrides_from(|var| match var {
            "ESTUARY_DEFAULT_ENCODING" => Some("US-ASCII".to_owned()),
            "ESTUARY_DISABLE_TIMEOUTS" => Some("yes".to_owned()),
            _ => None,
        })
        .unwrap();

    let ctx = EsbContext::new(configuration);
    assert_eq!(ctx.default_encoding(), "US-ASCII");
    assert!(ctx.is_disable_timeouts());

    let mut message = Message::new("x", ctx);
    assert_eq!(message.get_payload(&DataType::string()).unwrap().as_str(), Some("x"));
}
