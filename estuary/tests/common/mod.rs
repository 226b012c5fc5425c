#![allow(dead_code)]

use estuary::testing::FnTransformer;
use estuary::{
    Capabilities, Configuration, DataType, EsbContext, Payload, TransformerError,
    TransformerRegistry,
};
use std::sync::Arc;

// ============================================================================
// Contexts
// ============================================================================

/// Default configuration with the standard converters registered.
pub fn context() -> Arc<EsbContext> {
    context_with(Configuration::default())
}

/// `configuration` with the standard converters registered.
pub fn context_with(configuration: Configuration) -> Arc<EsbContext> {
    EsbContext::builder()
        .configuration(configuration)
        .transformers(Arc::new(TransformerRegistry::standard()))
        .build()
}

/// Extended transformations disabled.
pub fn strict_context() -> Arc<EsbContext> {
    context_with(Configuration {
        use_extended_transformations: false,
        ..Configuration::default()
    })
}

// ============================================================================
// Transformers
// ============================================================================

/// String -> String, upper-casing the text.
pub fn upper() -> FnTransformer {
    FnTransformer::builder("upper")
        .source(DataType::string())
        .returns(DataType::string())
        .build(|request| {
            let text = request.payload().as_str().ok_or_else(|| TransformerError::CannotApply {
                transformer: "upper".to_owned(),
                payload_type: request.payload().type_ref().name().to_owned(),
            })?;
            Ok(Payload::new(text.to_uppercase()))
        })
}

/// String -> String, appending `suffix`.
pub fn append(suffix: &'static str) -> FnTransformer {
    FnTransformer::builder(format!("append-{suffix}"))
        .source(DataType::string())
        .returns(DataType::string())
        .build(move |request| {
            let text = request.payload().as_str().unwrap_or_default();
            Ok(Payload::new(format!("{text}{suffix}")))
        })
}

/// i64 -> String.
pub fn int_to_text(capabilities: Capabilities) -> FnTransformer {
    FnTransformer::builder("int-to-text")
        .source(DataType::of::<i64>())
        .returns(DataType::string())
        .capabilities(capabilities)
        .build(|request| {
            let value = request.payload().downcast_ref::<i64>().copied().unwrap_or_default();
            Ok(Payload::new(value.to_string()))
        })
}
