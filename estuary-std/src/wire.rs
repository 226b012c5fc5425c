//! Binary serialization of messages and events.
//!
//! Messages and events are written with `bincode`. What can be written:
//!
//! - payloads and property values that are strings, bytes, booleans,
//!   64-bit integers or floats are written as they are
//! - any other payload is converted to bytes through the context's
//!   transformer lookup; without a converter encoding fails naming the type
//! - object properties holding anything else fail naming the key
//! - object attachments are converted to bytes by content type, or fail
//!   naming the attachment
//!
//! Reading yields a [`DetachedMessage`] or [`DetachedEvent`]. Neither is
//! usable until [`init_after_deserialisation`](DetachedMessage::init_after_deserialisation)
//! re-attaches it to a live [`EsbContext`].
//!
//! The error of an exception payload does not survive the trip; it comes
//! back as a [`RemoteError`] carrying the original text.

use estuary_core::{
    Attachment, AttachmentContent, DataType, EsbContext, Event, ExceptionPayload,
    ExchangePattern, FlowConstruct, FlowVariables, Message, MessageError, Payload,
    PropertyScope, PropertyValue, Session, TypedProperty,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Serialization failures.
#[derive(Error, Debug)]
pub enum WireError {
    /// A value has no wire representation.
    #[error("{what} cannot be serialized: {reason}")]
    NotSerializable {
        /// The offending value: payload type, property key or attachment name.
        what: String,
        /// Why.
        reason: String,
    },

    /// The binary codec failed.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Rebuilding or reading the message failed.
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Stand-in for an exception payload's error after deserialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    /// Text of the original error.
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl WireValue {
    fn from_payload(payload: &Payload) -> Option<Self> {
        if payload.is_null() {
            return Some(Self::Null);
        }
        if let Some(text) = payload.as_str() {
            return Some(Self::String(text.to_owned()));
        }
        if let Some(bytes) = payload.as_bytes() {
            return Some(Self::Bytes(bytes.to_vec()));
        }
        payload
            .downcast_ref::<bool>()
            .map(|b| Self::Bool(*b))
            .or_else(|| payload.downcast_ref::<i64>().map(|i| Self::Int(*i)))
            .or_else(|| payload.downcast_ref::<f64>().map(|x| Self::Float(*x)))
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bool(b) => Some(Self::Bool(*b)),
            PropertyValue::Int(i) => Some(Self::Int(*i)),
            PropertyValue::Float(x) => Some(Self::Float(*x)),
            PropertyValue::String(s) => Some(Self::String(s.clone())),
            PropertyValue::Bytes(b) => Some(Self::Bytes(b.clone())),
            PropertyValue::Object(payload) => Self::from_payload(payload),
        }
    }

    fn into_payload(self) -> Payload {
        match self {
            Self::Null => Payload::null(),
            Self::Bool(b) => Payload::new(b),
            Self::Int(i) => Payload::new(i),
            Self::Float(x) => Payload::new(x),
            Self::String(s) => Payload::new(s),
            Self::Bytes(b) => Payload::new(b),
        }
    }

    fn into_property(self) -> Option<PropertyValue> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(PropertyValue::Bool(b)),
            Self::Int(i) => Some(PropertyValue::Int(i)),
            Self::Float(x) => Some(PropertyValue::Float(x)),
            Self::String(s) => Some(PropertyValue::String(s)),
            Self::Bytes(b) => Some(PropertyValue::Bytes(b)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireProperty {
    key: String,
    value: WireValue,
    mime_type: String,
    encoding: Option<String>,
}

impl WireProperty {
    fn encode(key: &str, property: &TypedProperty) -> Result<Self, WireError> {
        let value = WireValue::from_property(&property.value).ok_or_else(|| {
            WireError::NotSerializable {
                what: format!("property `{key}`"),
                reason: format!("value of kind {} has no wire form", property.value.kind()),
            }
        })?;
        Ok(Self {
            key: key.to_owned(),
            value,
            mime_type: property.data_type.mime_type().to_owned(),
            encoding: property.data_type.encoding().map(str::to_owned),
        })
    }

    fn decode(self) -> Option<(String, PropertyValue, DataType)> {
        let value = self.value.into_property()?;
        let mut data_type = value.data_type().with_mime_type(self.mime_type);
        data_type.set_encoding(self.encoding);
        Some((self.key, value, data_type))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireAttachment {
    name: String,
    content_type: String,
    data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireExceptionPayload {
    code: i32,
    message: String,
    info: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
enum WireBody {
    Simple(WireValue),
    Collection(Vec<WireMessage>),
    Invalidated(WireValue),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireMessage {
    id: Uuid,
    root_id: Uuid,
    body: WireBody,
    mime_type: String,
    encoding: Option<String>,
    inbound: Vec<WireProperty>,
    invocation: Vec<WireProperty>,
    outbound: Vec<WireProperty>,
    inbound_attachments: Vec<WireAttachment>,
    outbound_attachments: Vec<WireAttachment>,
    exception: Option<WireExceptionPayload>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireFlow {
    name: String,
    synchronous: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireEvent {
    id: Uuid,
    message: WireMessage,
    session_id: Uuid,
    session_properties: Vec<(String, WireValue)>,
    flow_variables: Vec<WireProperty>,
    exchange_pattern: ExchangePattern,
    timeout_ms: Option<u64>,
    flow: Option<WireFlow>,
    transacted: bool,
    endpoint_uri: Option<String>,
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Serialize a message.
///
/// A payload that needs conversion is converted in place, so a stream
/// payload is drained and replaced by its bytes.
pub fn encode_message(message: &mut Message) -> Result<Vec<u8>, WireError> {
    let wire = wire_message(message)?;
    Ok(bincode::serialize(&wire)?)
}

/// Deserialize a message.
pub fn decode_message(bytes: &[u8]) -> Result<DetachedMessage, WireError> {
    Ok(DetachedMessage {
        wire: bincode::deserialize(bytes)?,
    })
}

/// Serialize an event with its message, session and flow variables.
pub fn encode_event(event: &mut Event) -> Result<Vec<u8>, WireError> {
    let message = wire_message(event.message_mut())?;

    let session = event.session();
    let session_properties = session
        .property_names()
        .into_iter()
        .filter_map(|key| session.property(&key).map(|value| (key, value)))
        .map(|(key, value)| {
            WireValue::from_property(&value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| WireError::NotSerializable {
                    what: format!("session property `{key}`"),
                    reason: format!("value of kind {} has no wire form", value.kind()),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let variables = event.flow_variables();
    let flow_variables = variables
        .names()
        .into_iter()
        .filter_map(|key| variables.typed(&key).map(|typed| (key, typed)))
        .map(|(key, typed)| {
            WireProperty::encode(&key, &typed).map_err(|e| match e {
                WireError::NotSerializable { reason, .. } => WireError::NotSerializable {
                    what: format!("flow variable `{key}`"),
                    reason,
                },
                other => other,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let wire = WireEvent {
        id: event.id(),
        message,
        session_id: session.id(),
        session_properties,
        flow_variables,
        exchange_pattern: event.exchange_pattern(),
        timeout_ms: event
            .explicit_timeout()
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        flow: event.flow_construct().map(|f| WireFlow {
            name: f.name().to_owned(),
            synchronous: f.is_synchronous(),
        }),
        transacted: event.is_transacted(),
        endpoint_uri: event.endpoint_uri().map(str::to_owned),
    };
    Ok(bincode::serialize(&wire)?)
}

/// Deserialize an event.
pub fn decode_event(bytes: &[u8]) -> Result<DetachedEvent, WireError> {
    Ok(DetachedEvent {
        wire: bincode::deserialize(bytes)?,
    })
}

fn wire_message(message: &mut Message) -> Result<WireMessage, WireError> {
    let body = if message.is_collection() {
        let members = message.map_members(wire_message)?;
        WireBody::Collection(members)
    } else if message.is_invalidated_payload() {
        WireBody::Invalidated(wire_payload(message)?)
    } else {
        WireBody::Simple(wire_payload(message)?)
    };

    let properties = |scope| -> Result<Vec<WireProperty>, WireError> {
        message
            .scoped_properties(scope)
            .iter()
            .map(|(key, property)| WireProperty::encode(key, property))
            .collect()
    };
    let inbound = properties(PropertyScope::Inbound)?;
    let invocation = properties(PropertyScope::Invocation)?;
    let outbound = properties(PropertyScope::Outbound)?;

    let encoding = message.encoding();
    let inbound_attachments = message
        .inbound_attachment_names()
        .into_iter()
        .filter_map(|name| message.inbound_attachment(&name).cloned().map(|a| (name, a)))
        .map(|(name, attachment)| wire_attachment(message, name, &attachment, &encoding))
        .collect::<Result<Vec<_>, _>>()?;
    let outbound_attachments = message
        .outbound_attachment_names()
        .into_iter()
        .filter_map(|name| message.outbound_attachment(&name).cloned().map(|a| (name, a)))
        .map(|(name, attachment)| wire_attachment(message, name, &attachment, &encoding))
        .collect::<Result<Vec<_>, _>>()?;

    let exception = message.exception_payload().map(|p| WireExceptionPayload {
        code: p.code(),
        message: p.message().to_owned(),
        info: p.info().clone(),
    });

    Ok(WireMessage {
        id: message.id(),
        root_id: message.root_id(),
        body,
        mime_type: message.data_type().mime_type().to_owned(),
        encoding: message.data_type().encoding().map(str::to_owned),
        inbound,
        invocation,
        outbound,
        inbound_attachments,
        outbound_attachments,
        exception,
    })
}

fn wire_payload(message: &mut Message) -> Result<WireValue, WireError> {
    if let Some(value) = WireValue::from_payload(message.payload()) {
        return Ok(value);
    }
    let type_name = message.payload().type_ref().name();
    debug!(payload_type = type_name, "converting payload to bytes for serialization");
    let converted = message
        .get_payload(&DataType::bytes())
        .map_err(|e| WireError::NotSerializable {
            what: format!("payload of type {type_name}"),
            reason: e.to_string(),
        })?;
    converted
        .as_bytes()
        .map(|bytes| WireValue::Bytes(bytes.to_vec()))
        .ok_or_else(|| WireError::NotSerializable {
            what: format!("payload of type {type_name}"),
            reason: "conversion did not produce bytes".to_owned(),
        })
}

fn wire_attachment(
    message: &Message,
    name: String,
    attachment: &Attachment,
    encoding: &str,
) -> Result<WireAttachment, WireError> {
    let data = match attachment.content() {
        AttachmentContent::Bytes(bytes) => bytes.clone(),
        AttachmentContent::Object(payload) => {
            attachment_bytes(message, payload, attachment, encoding).map_err(|reason| {
                WireError::NotSerializable {
                    what: format!("attachment `{name}`"),
                    reason,
                }
            })?
        }
    };
    Ok(WireAttachment {
        name,
        content_type: attachment.content_type().to_owned(),
        data,
    })
}

fn attachment_bytes(
    message: &Message,
    payload: &Payload,
    attachment: &Attachment,
    encoding: &str,
) -> Result<Vec<u8>, String> {
    if let Some(bytes) = payload.as_bytes() {
        return Ok(bytes.to_vec());
    }
    let mut holder = Message::builder(payload.clone(), Arc::clone(message.context()))
        .data_type(attachment.data_type())
        .encoding(encoding)
        .build();
    let converted = holder
        .get_payload(&DataType::bytes())
        .map_err(|e| e.to_string())?;
    converted
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| "conversion did not produce bytes".to_owned())
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// A deserialized message not yet attached to a context.
#[derive(Debug, Clone)]
pub struct DetachedMessage {
    wire: WireMessage,
}

impl DetachedMessage {
    /// Id of the message.
    pub fn id(&self) -> Uuid {
        self.wire.id
    }

    /// Re-attach to `context`, producing a usable message with no owner
    /// thread.
    pub fn init_after_deserialisation(
        self,
        context: &Arc<EsbContext>,
    ) -> Result<Message, WireError> {
        rebuild_message(self.wire, context)
    }
}

/// A deserialized event not yet attached to a context.
#[derive(Debug, Clone)]
pub struct DetachedEvent {
    wire: WireEvent,
}

impl DetachedEvent {
    /// Id of the event.
    pub fn id(&self) -> Uuid {
        self.wire.id
    }

    /// Re-attach to `context`, producing a usable event.
    pub fn init_after_deserialisation(self, context: &Arc<EsbContext>) -> Result<Event, WireError> {
        let wire = self.wire;
        let message = rebuild_message(wire.message, context)?;

        let session = Session::with_id(wire.session_id);
        for (key, value) in wire.session_properties {
            session.set_property(&key, value.into_property());
        }

        let flow_variables = FlowVariables::new();
        for property in wire.flow_variables {
            if let Some((key, value, data_type)) = property.decode() {
                flow_variables.set(&key, Some(value), Some(data_type));
            }
        }

        let mut builder = Event::builder(message)
            .id(wire.id)
            .exchange_pattern(wire.exchange_pattern)
            .session(session)
            .transacted(wire.transacted)
            .flow_variables(flow_variables);
        if let Some(flow) = wire.flow {
            builder = builder.flow_construct(Arc::new(FlowConstruct::new(flow.name, flow.synchronous)));
        }
        if let Some(timeout_ms) = wire.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(uri) = wire.endpoint_uri {
            builder = builder.endpoint_uri(uri);
        }
        Ok(builder.build())
    }
}

fn rebuild_message(wire: WireMessage, context: &Arc<EsbContext>) -> Result<Message, WireError> {
    let mut message = match wire.body {
        WireBody::Simple(value) => Message::new(value.into_payload(), Arc::clone(context)),
        WireBody::Collection(members) => {
            let members = members
                .into_iter()
                .map(|m| rebuild_message(m, context))
                .collect::<Result<Vec<_>, _>>()?;
            Message::collection(members, Arc::clone(context))
        }
        WireBody::Invalidated(value) => {
            let mut message = Message::collection(Vec::new(), Arc::clone(context));
            message.set_payload(value.into_payload())?;
            message
        }
    };
    message.set_unique_id(wire.id)?;
    message.set_root_id(wire.root_id)?;

    let mut data_type = message.data_type().clone().with_mime_type(wire.mime_type);
    data_type.set_encoding(wire.encoding);
    message.set_data_type(data_type)?;

    for (scope, properties) in [
        (PropertyScope::Inbound, wire.inbound),
        (PropertyScope::Invocation, wire.invocation),
        (PropertyScope::Outbound, wire.outbound),
    ] {
        for property in properties {
            if let Some((key, value, data_type)) = property.decode() {
                message.set_property_with_type(&key, Some(value), scope, Some(data_type))?;
            }
        }
    }

    for attachment in wire.inbound_attachments {
        message.add_inbound_attachment(
            attachment.name,
            Attachment::bytes(attachment.data, attachment.content_type),
        )?;
    }
    for attachment in wire.outbound_attachments {
        message.add_outbound_attachment(
            attachment.name,
            Attachment::bytes(attachment.data, attachment.content_type),
        )?;
    }

    if let Some(exception) = wire.exception {
        let payload = exception.info.into_iter().fold(
            ExceptionPayload::new(Box::new(RemoteError {
                message: exception.message,
            }))
            .with_code(exception.code),
            |payload, (key, value)| payload.with_info(key, value),
        );
        message.set_exception_payload(Some(payload))?;
    }

    message.reset_access_control();
    Ok(message)
}
