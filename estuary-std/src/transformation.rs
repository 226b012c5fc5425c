//! Transformation engine.
//!
//! [`TransformationService`] applies a [`TransformerChain`] to a message,
//! left to right. For each step:
//!
//! 1. If the step accepts the current payload type, it runs and its result
//!    replaces the payload. The new data type is merged with the previous
//!    one: a wildcard MIME type, a missing encoding or an `object` runtime
//!    type fall back to what the message had before.
//! 2. Otherwise, with extended transformations enabled, a converter that
//!    is not needed is skipped; any other step is preceded by an implicit
//!    conversion found through the context's
//!    [`DataTypeConversionResolver`](estuary_core::DataTypeConversionResolver).
//!    No implicit conversion means [`TransformerError::CannotApply`].
//! 3. With extended transformations disabled, a step that ignores bad input
//!    is skipped and any other unsupported step ends the chain.
//!
//! Capabilities of every step are read once, when the chain is built.

use estuary_core::{
    Capabilities, DataType, EsbContext, Event, Message, MessageError, Payload, TransformRequest,
    Transformed, Transformer, TransformerError,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

struct ChainStep {
    transformer: Arc<dyn Transformer>,
    capabilities: Capabilities,
}

impl ChainStep {
    fn new(transformer: Arc<dyn Transformer>) -> Self {
        let capabilities = transformer.capabilities();
        Self {
            transformer,
            capabilities,
        }
    }

    fn accepts(&self, source: &DataType, payload: &Payload) -> bool {
        if payload.is_null() && self.capabilities.contains(Capabilities::ACCEPT_NULL) {
            return true;
        }
        self.transformer.is_source_data_type_supported(source)
    }
}

/// An ordered list of transformers.
#[derive(Default)]
pub struct TransformerChain {
    steps: Vec<ChainStep>,
}

impl TransformerChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transformer.
    pub fn then<T: Transformer>(self, transformer: T) -> Self {
        self.then_arc(Arc::new(transformer))
    }

    /// Append a shared transformer.
    pub fn then_arc(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.steps.push(ChainStep::new(transformer));
        self
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps, in order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.transformer.name()).collect()
    }
}

impl FromIterator<Arc<dyn Transformer>> for TransformerChain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Transformer>>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().map(ChainStep::new).collect(),
        }
    }
}

impl fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Applies transformer chains using the lookups of an [`EsbContext`].
#[derive(Debug, Clone)]
pub struct TransformationService {
    context: Arc<EsbContext>,
}

impl TransformationService {
    /// Create a service bound to `context`.
    pub fn new(context: Arc<EsbContext>) -> Self {
        Self { context }
    }

    /// The runtime context.
    pub fn context(&self) -> &Arc<EsbContext> {
        &self.context
    }

    /// Apply `chain` to `message` and return the resulting message.
    ///
    /// `event` is handed to message-aware transformers.
    pub fn apply_transformers(
        &self,
        message: Message,
        event: Option<&Event>,
        chain: &TransformerChain,
    ) -> Result<Message, MessageError> {
        self.run(message, event, chain)
    }

    /// Like [`apply_transformers`](Self::apply_transformers), then convert
    /// the payload to `output_type` if it is not already of that type.
    pub fn apply_transformers_to(
        &self,
        message: Message,
        event: Option<&Event>,
        chain: &TransformerChain,
        output_type: &DataType,
    ) -> Result<Message, MessageError> {
        let mut message = self.run(message, event, chain)?;
        let current = DataType::new(message.payload().type_ref());
        if !output_type.type_ref().is_assignable_from(&current.type_ref()) {
            let converted = message.get_payload(output_type)?;
            if !converted.ptr_eq(message.payload()) {
                message.set_payload(converted)?;
            }
        }
        Ok(message)
    }

    /// Apply `chain` to the message of `event`, replacing it.
    pub fn apply_to_event(
        &self,
        event: &mut Event,
        chain: &TransformerChain,
    ) -> Result<(), MessageError> {
        let message = event.message().new_thread_copy();
        let transformed = self.run(message, Some(event), chain)?;
        event.set_message(transformed);
        Ok(())
    }

    /// The payload converted to `target`.
    ///
    /// A valid collection converts every member and returns the list of
    /// converted member payloads.
    pub fn get_payload(
        &self,
        message: &mut Message,
        target: &DataType,
    ) -> Result<Payload, MessageError> {
        if message.is_collection() {
            let payloads = message.map_members(|member| member.get_payload(target))?;
            return Ok(Payload::new(payloads));
        }
        message.get_payload(target)
    }

    /// The payload converted to `T`.
    pub fn get_payload_as<T: Any + Send + Sync>(
        &self,
        message: &mut Message,
    ) -> Result<Arc<T>, MessageError> {
        message.get_payload_as::<T>()
    }

    fn run(
        &self,
        mut message: Message,
        event: Option<&Event>,
        chain: &TransformerChain,
    ) -> Result<Message, MessageError> {
        let extended = self.context.use_extended_transformations();
        let last = chain.len().saturating_sub(1);

        for (index, step) in chain.steps.iter().enumerate() {
            let source = DataType::new(message.payload().type_ref());

            if step.accepts(&source, message.payload()) {
                message = transform_message(message, event, &step.transformer, step.capabilities)?;
                continue;
            }

            if extended {
                if can_skip_converter(step, index == last, message.payload()) {
                    debug!(
                        transformer = step.transformer.name(),
                        "skipping converter, payload already usable"
                    );
                    continue;
                }
                let implicit = self
                    .context
                    .conversion_resolver()
                    .resolve(&source, step.transformer.source_data_types())
                    .ok_or_else(|| TransformerError::CannotApply {
                        transformer: step.transformer.name().to_owned(),
                        payload_type: source.type_ref().name().to_owned(),
                    })?;
                debug!(
                    implicit = implicit.name(),
                    transformer = step.transformer.name(),
                    "applying implicit conversion"
                );
                let capabilities = implicit.capabilities();
                message = transform_message(message, event, &implicit, capabilities)?;
                message = transform_message(message, event, &step.transformer, step.capabilities)?;
            } else if step.capabilities.contains(Capabilities::IGNORE_BAD_INPUT) {
                debug!(
                    transformer = step.transformer.name(),
                    payload_type = %source.type_ref(),
                    "ignoring unsupported payload"
                );
            } else {
                debug!(
                    transformer = step.transformer.name(),
                    payload_type = %source.type_ref(),
                    remaining = chain.len() - index,
                    "unsupported payload, ending transformer chain"
                );
                break;
            }
        }
        Ok(message)
    }
}

fn can_skip_converter(step: &ChainStep, is_last: bool, payload: &Payload) -> bool {
    if !step.capabilities.contains(Capabilities::CONVERTER) {
        return false;
    }
    !is_last
        || step
            .transformer
            .return_data_type()
            .type_ref()
            .is_assignable_from(&payload.type_ref())
}

fn transform_message(
    message: Message,
    event: Option<&Event>,
    transformer: &Arc<dyn Transformer>,
    capabilities: Capabilities,
) -> Result<Message, MessageError> {
    let encoding = message.encoding();
    let event = event.filter(|_| capabilities.contains(Capabilities::MESSAGE_AWARE));
    let request = TransformRequest::new(&message, event, &encoding);
    debug!(transformer = transformer.name(), "applying transformer");

    match transformer.transform(&request)? {
        Transformed::Message(replacement) => Ok(replacement),
        Transformed::Value(payload) => {
            let data_type = merge_data_type(&message, transformer.return_data_type(), &payload);
            Ok(Message::derive_with_type(payload, &message, data_type))
        }
    }
}

fn merge_data_type(message: &Message, returned: &DataType, payload: &Payload) -> DataType {
    let previous = message.data_type();
    let mime_type = if returned.is_any_mime_type() {
        previous.mime_type()
    } else {
        returned.mime_type()
    };
    let encoding = returned
        .encoding()
        .map_or_else(|| message.encoding(), str::to_owned);
    let actual = payload.type_ref();
    let type_ref = if !returned.type_ref().is_object() {
        returned.type_ref()
    } else if previous.type_ref().is_assignable_from(&actual) {
        previous.type_ref()
    } else {
        actual
    };
    DataType::new(type_ref)
        .with_mime_type(mime_type)
        .with_encoding(encoding)
}
