//! Payload type descriptions.
//!
//! A [`DataType`] pairs a runtime type ([`TypeRef`]) with a MIME type and an
//! optional character encoding. Compatibility between data types drives both
//! on-demand payload conversion and transformer selection:
//!
//! ```rust,ignore
//! let source = DataType::of::<String>().with_mime_type(mime::TEXT_PLAIN);
//! assert!(DataType::of::<String>().is_compatible_with(&source));
//! assert!(DataType::object().is_compatible_with(&source));
//! ```

use crate::payload::{NullPayload, PayloadStream};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Well-known MIME types.
pub mod mime {
    /// Wildcard MIME type, compatible with everything.
    pub const ANY: &str = "*/*";
    /// Plain text.
    pub const TEXT_PLAIN: &str = "text/plain";
    /// Opaque bytes.
    pub const BINARY: &str = "application/octet-stream";
    /// JSON documents.
    pub const JSON: &str = "application/json";
    /// XML documents.
    pub const XML: &str = "application/xml";
}

/// Runtime identity of a payload type.
///
/// The distinguished [`TypeRef::object`] is the top type: it is assignable
/// from every other type.
#[derive(Clone, Copy)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
}

impl TypeRef {
    /// The type reference of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The top type.
    pub fn object() -> Self {
        Self::of::<dyn Any + Send + Sync>()
    }

    /// The type of an absent payload.
    pub fn null() -> Self {
        Self::of::<NullPayload>()
    }

    /// The underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this is the top type.
    pub fn is_object(&self) -> bool {
        self.id == TypeId::of::<dyn Any + Send + Sync>()
    }

    /// Whether this reference denotes `T`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Whether a value of type `other` may be used where `self` is expected.
    pub fn is_assignable_from(&self, other: &TypeRef) -> bool {
        self.is_object() || self.id == other.id
    }

    /// Whether values of this type can only be read once.
    pub fn is_consumable(&self) -> bool {
        self.is::<PayloadStream>()
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Runtime type, MIME type and encoding of a payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DataType {
    type_ref: TypeRef,
    mime_type: String,
    encoding: Option<String>,
}

impl DataType {
    /// A data type for the given runtime type, any MIME type, no encoding.
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            mime_type: mime::ANY.to_owned(),
            encoding: None,
        }
    }

    /// Shorthand for `DataType::new(TypeRef::of::<T>())`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(TypeRef::of::<T>())
    }

    /// Matches any payload.
    pub fn object() -> Self {
        Self::new(TypeRef::object())
    }

    /// Text payloads.
    pub fn string() -> Self {
        Self::of::<String>().with_mime_type(mime::TEXT_PLAIN)
    }

    /// Binary payloads.
    pub fn bytes() -> Self {
        Self::of::<Vec<u8>>().with_mime_type(mime::BINARY)
    }

    /// Read-once stream payloads.
    pub fn stream() -> Self {
        Self::of::<PayloadStream>()
    }

    /// Replace the MIME type. An empty string resets it to the wildcard.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.set_mime_type(mime_type);
        self
    }

    /// Replace the encoding.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Replace the runtime type, keeping MIME type and encoding.
    pub fn with_type_ref(mut self, type_ref: TypeRef) -> Self {
        self.type_ref = type_ref;
        self
    }

    /// In-place MIME type setter.
    pub fn set_mime_type(&mut self, mime_type: impl Into<String>) {
        let mime_type = mime_type.into();
        self.mime_type = if mime_type.is_empty() {
            mime::ANY.to_owned()
        } else {
            mime_type
        };
    }

    /// In-place encoding setter.
    pub fn set_encoding(&mut self, encoding: Option<String>) {
        self.encoding = encoding;
    }

    /// The runtime type.
    pub fn type_ref(&self) -> TypeRef {
        self.type_ref
    }

    /// The MIME type, `*/*` when unspecified.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The character encoding, if one was declared.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Whether the MIME type is the wildcard.
    pub fn is_any_mime_type(&self) -> bool {
        self.mime_type == mime::ANY
    }

    /// Whether a payload described by `other` satisfies this data type.
    ///
    /// The runtime type of `other` must be assignable to ours, and either
    /// side's MIME type must be the wildcard or both must match exactly.
    pub fn is_compatible_with(&self, other: &DataType) -> bool {
        if self == other {
            return true;
        }
        let types_match = self.type_ref.is_assignable_from(&other.type_ref);
        let mimes_match = self.is_any_mime_type()
            || other.is_any_mime_type()
            || self.mime_type.eq_ignore_ascii_case(&other.mime_type);
        types_match && mimes_match
    }

    /// Whether values of this type can only be read once.
    pub fn is_stream_type(&self) -> bool {
        self.type_ref.is_consumable()
    }
}

impl Default for DataType {
    fn default() -> Self {
        Self::object()
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DataType{{type={}, mime_type='{}', encoding='{}'}}",
            self.type_ref,
            self.mime_type,
            self.encoding.as_deref().unwrap_or("null")
        )
    }
}
