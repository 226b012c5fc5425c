//! Standard converters between text, bytes and streams.
//!
//! | converter | from | to |
//! |-----------|------|----|
//! | [`StringToBytes`] | `String` | `Vec<u8>` |
//! | [`BytesToString`] | `Vec<u8>` | `String` |
//! | [`StreamToBytes`] | [`PayloadStream`] | `Vec<u8>` |
//! | [`StreamToString`] | [`PayloadStream`] | `String` |
//!
//! Text conversions honour the request encoding. UTF-8, US-ASCII and
//! ISO-8859-1 are supported.

use estuary_core::{
    Capabilities, DataType, Payload, PayloadStream, TransformRequest, Transformed, Transformer,
    TransformerError, mime,
};
use std::sync::Arc;
use thiserror::Error;

/// Text encoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CharsetError {
    /// The encoding name is not known.
    #[error("unsupported encoding `{0}`")]
    Unsupported(String),

    /// A character has no representation in the target encoding.
    #[error("character {ch:?} cannot be encoded as {encoding}")]
    Unmappable {
        /// The character.
        ch: char,
        /// Target encoding.
        encoding: String,
    },

    /// The bytes are not valid in the source encoding.
    #[error("input is not valid {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    Ascii,
    Latin1,
}

impl Charset {
    fn for_name(name: &str) -> Result<Self, CharsetError> {
        match name.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Ok(Self::Utf8),
            "US-ASCII" | "ASCII" => Ok(Self::Ascii),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" => Ok(Self::Latin1),
            _ => Err(CharsetError::Unsupported(name.to_owned())),
        }
    }

    fn max_char(self) -> u32 {
        match self {
            Self::Utf8 => u32::from(char::MAX),
            Self::Ascii => 0x7f,
            Self::Latin1 => 0xff,
        }
    }
}

/// Encode text in the named encoding.
pub fn encode(text: &str, encoding: &str) -> Result<Vec<u8>, CharsetError> {
    let charset = Charset::for_name(encoding)?;
    if charset == Charset::Utf8 {
        return Ok(text.as_bytes().to_vec());
    }
    text.chars()
        .map(|ch| {
            u8::try_from(u32::from(ch))
                .ok()
                .filter(|b| u32::from(*b) <= charset.max_char())
                .ok_or_else(|| CharsetError::Unmappable {
                    ch,
                    encoding: encoding.to_owned(),
                })
        })
        .collect()
}

/// Decode bytes in the named encoding.
pub fn decode(bytes: &[u8], encoding: &str) -> Result<String, CharsetError> {
    match Charset::for_name(encoding)? {
        Charset::Utf8 => {
            String::from_utf8(bytes.to_vec()).map_err(|_| CharsetError::Invalid(encoding.to_owned()))
        }
        Charset::Ascii if !bytes.is_ascii() => Err(CharsetError::Invalid(encoding.to_owned())),
        Charset::Ascii | Charset::Latin1 => Ok(bytes.iter().map(|b| char::from(*b)).collect()),
    }
}

fn cannot_apply(name: &str, request: &TransformRequest<'_>) -> TransformerError {
    TransformerError::CannotApply {
        transformer: name.to_owned(),
        payload_type: request.payload().type_ref().name().to_owned(),
    }
}

fn failed(name: &str, cause: impl std::error::Error + Send + Sync + 'static) -> TransformerError {
    TransformerError::Failed {
        transformer: name.to_owned(),
        cause: Box::new(cause),
    }
}

fn drain(name: &str, stream: &PayloadStream) -> Result<Vec<u8>, TransformerError> {
    if stream.is_consumed() {
        return Err(TransformerError::StreamConsumed);
    }
    stream.read_all().map_err(|e| failed(name, e))
}

macro_rules! converter_struct {
    ($name:ident, $doc:literal, $source:expr, $returns:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone)]
        pub struct $name {
            sources: Vec<DataType>,
            returns: DataType,
        }

        impl $name {
            /// Create the converter.
            pub fn new() -> Self {
                Self {
                    sources: vec![$source],
                    returns: $returns,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

converter_struct!(
    StringToBytes,
    "Encodes text with the request encoding.",
    DataType::of::<String>(),
    DataType::bytes()
);
converter_struct!(
    BytesToString,
    "Decodes bytes with the request encoding.",
    DataType::of::<Vec<u8>>(),
    DataType::of::<String>().with_mime_type(mime::TEXT_PLAIN)
);
converter_struct!(
    StreamToBytes,
    "Drains a stream into bytes.",
    DataType::stream(),
    DataType::bytes()
);
converter_struct!(
    StreamToString,
    "Drains a stream and decodes it with the request encoding.",
    DataType::stream(),
    DataType::of::<String>().with_mime_type(mime::TEXT_PLAIN)
);

impl Transformer for StringToBytes {
    fn name(&self) -> &str {
        "StringToBytes"
    }

    fn source_data_types(&self) -> &[DataType] {
        &self.sources
    }

    fn return_data_type(&self) -> &DataType {
        &self.returns
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONVERTER
    }

    fn transform(&self, request: &TransformRequest<'_>) -> Result<Transformed, TransformerError> {
        let text = request
            .payload_ref::<String>()
            .ok_or_else(|| cannot_apply(self.name(), request))?;
        let bytes = encode(text, request.encoding()).map_err(|e| failed(self.name(), e))?;
        Ok(Payload::new(bytes).into())
    }
}

impl Transformer for BytesToString {
    fn name(&self) -> &str {
        "BytesToString"
    }

    fn source_data_types(&self) -> &[DataType] {
        &self.sources
    }

    fn return_data_type(&self) -> &DataType {
        &self.returns
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONVERTER
    }

    fn transform(&self, request: &TransformRequest<'_>) -> Result<Transformed, TransformerError> {
        let bytes = request
            .payload_ref::<Vec<u8>>()
            .ok_or_else(|| cannot_apply(self.name(), request))?;
        let text = decode(bytes, request.encoding()).map_err(|e| failed(self.name(), e))?;
        Ok(Payload::new(text).into())
    }
}

impl Transformer for StreamToBytes {
    fn name(&self) -> &str {
        "StreamToBytes"
    }

    fn source_data_types(&self) -> &[DataType] {
        &self.sources
    }

    fn return_data_type(&self) -> &DataType {
        &self.returns
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONVERTER
    }

    fn transform(&self, request: &TransformRequest<'_>) -> Result<Transformed, TransformerError> {
        let stream = request
            .payload_ref::<PayloadStream>()
            .ok_or_else(|| cannot_apply(self.name(), request))?;
        Ok(Payload::new(drain(self.name(), stream)?).into())
    }
}

impl Transformer for StreamToString {
    fn name(&self) -> &str {
        "StreamToString"
    }

    fn source_data_types(&self) -> &[DataType] {
        &self.sources
    }

    fn return_data_type(&self) -> &DataType {
        &self.returns
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CONVERTER
    }

    fn transform(&self, request: &TransformRequest<'_>) -> Result<Transformed, TransformerError> {
        let stream = request
            .payload_ref::<PayloadStream>()
            .ok_or_else(|| cannot_apply(self.name(), request))?;
        let bytes = drain(self.name(), stream)?;
        let text = decode(&bytes, request.encoding()).map_err(|e| failed(self.name(), e))?;
        Ok(Payload::new(text).into())
    }
}

/// Every standard converter, in lookup order.
pub fn standard_converters() -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(StringToBytes::new()),
        Arc::new(BytesToString::new()),
        Arc::new(StreamToBytes::new()),
        Arc::new(StreamToString::new()),
    ]
}
