//! Transformer traits.
//!
//! A [`Transformer`] converts the payload of a message into another value.
//! Transformers declare the data types they accept and the data type they
//! produce; the transformation engine uses these declarations to decide
//! whether a transformer applies, can be skipped, or needs an implicit
//! conversion first.
//!
//! Lookup of transformers by source and target type goes through the
//! [`TransformerLookup`] and [`DataTypeConversionResolver`] seams, which the
//! [`EsbContext`](crate::EsbContext) exposes.

use crate::data_type::DataType;
use crate::error::TransformerError;
use crate::event::Event;
use crate::message::Message;
use crate::payload::Payload;
use bitflags::bitflags;
use std::any::Any;
use std::sync::Arc;

bitflags! {
    /// Optional behaviours of a transformer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// Receives the surrounding event.
        const MESSAGE_AWARE = 1 << 0;
        /// Pure type conversion; may be skipped when the payload already
        /// has the desired type.
        const CONVERTER = 1 << 1;
        /// An unsupported payload skips the transformer instead of ending
        /// the chain.
        const IGNORE_BAD_INPUT = 1 << 2;
        /// Accepts an absent payload.
        const ACCEPT_NULL = 1 << 3;
    }
}

/// Input handed to [`Transformer::transform`].
#[derive(Debug)]
pub struct TransformRequest<'a> {
    message: &'a Message,
    event: Option<&'a Event>,
    encoding: &'a str,
}

impl<'a> TransformRequest<'a> {
    /// Build a request.
    pub fn new(message: &'a Message, event: Option<&'a Event>, encoding: &'a str) -> Self {
        Self {
            message,
            event,
            encoding,
        }
    }

    /// The message being transformed.
    pub fn message(&self) -> &'a Message {
        self.message
    }

    /// The surrounding event. Only set for message-aware transformers.
    pub fn event(&self) -> Option<&'a Event> {
        self.event
    }

    /// Encoding to use for text conversions.
    pub fn encoding(&self) -> &'a str {
        self.encoding
    }

    /// The payload being transformed.
    pub fn payload(&self) -> &'a Payload {
        self.message.payload()
    }

    /// The payload as `T`.
    pub fn payload_ref<T: Any>(&self) -> Option<&'a T> {
        self.message.payload().downcast_ref::<T>()
    }
}

/// Result of a transformation.
#[derive(Debug)]
pub enum Transformed {
    /// A new payload for the current message.
    Value(Payload),
    /// A replacement message.
    Message(Message),
}

impl From<Payload> for Transformed {
    fn from(payload: Payload) -> Self {
        Self::Value(payload)
    }
}

impl From<Message> for Transformed {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

/// Converts message payloads.
///
/// # Example
///
/// ```rust,ignore
/// struct Upper { sources: Vec<DataType>, returns: DataType }
///
/// impl Transformer for Upper {
///     fn name(&self) -> &str { "upper" }
///     fn source_data_types(&self) -> &[DataType] { &self.sources }
///     fn return_data_type(&self) -> &DataType { &self.returns }
///     fn transform(&self, req: &TransformRequest<'_>) -> Result<Transformed, TransformerError> {
///         let text = req.payload_ref::<String>().ok_or(TransformerError::CannotApply { .. })?;
///         Ok(Payload::new(text.to_uppercase()).into())
///     }
/// }
/// ```
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a transformer",
    label = "missing `Transformer` implementation",
    note = "Implement `Transformer`, or annotate a function with `#[converter]` / `#[transformer]`."
)]
pub trait Transformer: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Accepted payload types. Empty accepts everything.
    fn source_data_types(&self) -> &[DataType];

    /// Type of the produced payload.
    fn return_data_type(&self) -> &DataType;

    /// Optional behaviours.
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Whether a payload of `data_type` is accepted.
    fn is_source_data_type_supported(&self, data_type: &DataType) -> bool {
        let sources = self.source_data_types();
        sources.is_empty() || sources.iter().any(|s| s.is_compatible_with(data_type))
    }

    /// Convert the request's payload.
    fn transform(&self, request: &TransformRequest<'_>) -> Result<Transformed, TransformerError>;
}

/// Finds a transformer between two data types.
pub trait TransformerLookup: Send + Sync {
    /// A transformer accepting `source` and producing something compatible
    /// with `target`.
    fn lookup_transformer(
        &self,
        source: &DataType,
        target: &DataType,
    ) -> Option<Arc<dyn Transformer>>;
}

/// Finds an implicit conversion into one of a transformer's source types.
pub trait DataTypeConversionResolver: Send + Sync {
    /// The first transformer converting `source` into any of `candidates`.
    fn resolve(&self, source: &DataType, candidates: &[DataType]) -> Option<Arc<dyn Transformer>>;
}

/// Lookup and resolver that never find anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransformers;

impl TransformerLookup for NoTransformers {
    fn lookup_transformer(&self, _: &DataType, _: &DataType) -> Option<Arc<dyn Transformer>> {
        None
    }
}

impl DataTypeConversionResolver for NoTransformers {
    fn resolve(&self, _: &DataType, _: &[DataType]) -> Option<Arc<dyn Transformer>> {
        None
    }
}
