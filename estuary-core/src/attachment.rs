//! Named message attachments.

use crate::data_type::{DataType, mime};
use crate::payload::Payload;

/// Content of an attachment.
#[derive(Clone, Debug)]
pub enum AttachmentContent {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Any other value; converted to bytes when the message is serialized.
    Object(Payload),
}

/// A named side payload carried by a message.
#[derive(Clone, Debug)]
pub struct Attachment {
    content_type: String,
    content: AttachmentContent,
}

impl Attachment {
    /// An attachment holding bytes.
    pub fn bytes(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            content: AttachmentContent::Bytes(data.into()),
        }
    }

    /// An attachment holding an arbitrary value.
    pub fn object(payload: Payload, content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            content: AttachmentContent::Object(payload),
        }
    }

    /// Declared content type.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The content.
    pub fn content(&self) -> &AttachmentContent {
        &self.content
    }

    /// Bytes, if held directly.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            AttachmentContent::Bytes(bytes) => Some(bytes),
            AttachmentContent::Object(payload) => payload.as_bytes(),
        }
    }

    /// Data type of the content.
    pub fn data_type(&self) -> DataType {
        let type_ref = match &self.content {
            AttachmentContent::Bytes(_) => DataType::bytes().type_ref(),
            AttachmentContent::Object(payload) => payload.type_ref(),
        };
        let content_type = if self.content_type.is_empty() {
            mime::ANY
        } else {
            self.content_type.as_str()
        };
        DataType::new(type_ref).with_mime_type(content_type)
    }
}
