//! Message payloads.
//!
//! A [`Payload`] is an optional, shared, type-erased value. Absence is a
//! first-class state rather than a sentinel object: [`Payload::null`] carries
//! no value and reports [`TypeRef::null`] as its type.
//!
//! Read-once inputs are wrapped in a [`PayloadStream`]; the first conversion
//! that drains the stream replaces the message payload with the result.

use crate::data_type::TypeRef;
use std::any::Any;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};

/// Marker type identifying an absent payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullPayload;

#[derive(Clone)]
struct Value {
    value: Arc<dyn Any + Send + Sync>,
    type_ref: TypeRef,
}

/// An optional, shared, type-erased message payload.
///
/// Cloning a payload is cheap and shares the underlying value.
#[derive(Clone, Default)]
pub struct Payload(Option<Value>);

impl Payload {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared value.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(Some(Value {
            value,
            type_ref: TypeRef::of::<T>(),
        }))
    }

    /// The absent payload.
    pub fn null() -> Self {
        Self(None)
    }

    /// Whether there is no payload.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Runtime type of the held value.
    pub fn type_ref(&self) -> TypeRef {
        self.0
            .as_ref()
            .map_or_else(TypeRef::null, |value| value.type_ref)
    }

    /// Borrow the value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_ref()?.value.downcast_ref::<T>()
    }

    /// Share the value as `Arc<T>`.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = self.0.as_ref()?.value.clone();
        value.downcast::<T>().ok()
    }

    /// Whether the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_ref().is::<T>()
    }

    /// Whether both payloads share the same value.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a.value, &b.value),
            (None, None) => true,
            _ => false,
        }
    }

    /// Whether reading the payload consumes it.
    pub fn is_consumable(&self) -> bool {
        self.type_ref().is_consumable()
    }

    /// The value as a stream, if it is one.
    pub fn as_stream(&self) -> Option<&PayloadStream> {
        self.downcast_ref::<PayloadStream>()
    }

    /// The value as a string slice, if it is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    /// The value as a byte slice, if it is a `Vec<u8>`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.downcast_ref::<Vec<u8>>().map(Vec::as_slice)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.as_str() {
            return f.debug_tuple("Payload").field(&text).finish();
        }
        match &self.0 {
            None => f.write_str("Payload(null)"),
            Some(value) => write!(f, "Payload<{}>", value.type_ref),
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl From<PayloadStream> for Payload {
    fn from(value: PayloadStream) -> Self {
        Self::new(value)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Payload::null, Into::into)
    }
}

/// A read-once byte stream payload.
pub struct PayloadStream {
    reader: Mutex<Option<Box<dyn Read + Send>>>,
}

impl PayloadStream {
    /// Wrap a reader.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
        }
    }

    /// A stream over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(std::io::Cursor::new(bytes.into()))
    }

    /// Drain the stream. Subsequent calls fail.
    pub fn read_all(&self) -> std::io::Result<Vec<u8>> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut reader) = reader else {
            return Err(std::io::Error::other("stream already consumed"));
        };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Whether the stream was already drained.
    pub fn is_consumed(&self) -> bool {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for PayloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadStream")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
