//! # Messages
//!
//! A [`Message`] carries a payload, the [`DataType`] describing it, scoped
//! properties, attachments and an optional [`ExceptionPayload`].
//!
//! # Bodies
//!
//! A message is either simple or a collection of member messages. A
//! collection exposes the list of member payloads as its own payload.
//! Replacing that payload directly invalidates the collection for good:
//! collection operations fail from then on.
//!
//! # Ownership
//!
//! The first thread to touch a message becomes its owner and is the only one
//! allowed to write. Use [`Message::new_thread_copy`] before handing a
//! message to another thread, or [`Message::reset_access_control`] when the
//! handover is known to be safe.
//!
//! # Session scope
//!
//! SESSION-scope properties are stored in the [`Session`] of the event that
//! wraps the message. A message that was never placed in an event has no
//! session; SESSION writes then fail with [`MessageError::NoActiveSession`].

use crate::access::AccessControl;
use crate::attachment::Attachment;
use crate::context::EsbContext;
use crate::data_type::{DataType, mime};
use crate::error::{AccessError, MessageError, TransformerError};
use crate::exception_payload::ExceptionPayload;
use crate::payload::Payload;
use crate::property::{
    FromPropertyValue, PropertyScope, PropertyValue, ScopedPropertyStore, TypedProperty, names,
};
use crate::session::Session;
use crate::transformer::{TransformRequest, Transformed};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, warn};
use uuid::Uuid;

const COLLECTION_LOGGING_PLACEHOLDER: &str = "[This is a message collection]";
const UNCONVERTIBLE_LOGGING_PLACEHOLDER: &str = "[Message could not be converted to a String]";

struct Members {
    messages: Vec<Message>,
    payload: Payload,
}

impl Members {
    fn new(messages: Vec<Message>) -> Self {
        let mut members = Self {
            messages,
            payload: Payload::null(),
        };
        members.refresh();
        members
    }

    fn refresh(&mut self) {
        let payloads: Vec<Payload> = self.messages.iter().map(|m| m.payload().clone()).collect();
        self.payload = Payload::new(payloads);
    }
}

enum Body {
    Simple(Payload),
    Collection(Members),
    Invalidated(Payload),
}

impl Body {
    fn payload(&self) -> &Payload {
        match self {
            Body::Simple(payload) | Body::Invalidated(payload) => payload,
            Body::Collection(members) => &members.payload,
        }
    }

    fn thread_copy(&self) -> Body {
        match self {
            Body::Simple(payload) => Body::Simple(payload.clone()),
            Body::Invalidated(payload) => Body::Invalidated(payload.clone()),
            Body::Collection(members) => Body::Collection(Members {
                messages: members.messages.iter().map(Message::new_thread_copy).collect(),
                payload: members.payload.clone(),
            }),
        }
    }
}

/// A payload with its metadata.
pub struct Message {
    id: Uuid,
    root_id: Uuid,
    body: Body,
    data_type: DataType,
    exception_payload: Option<ExceptionPayload>,
    properties: ScopedPropertyStore,
    inbound_attachments: BTreeMap<String, Attachment>,
    outbound_attachments: BTreeMap<String, Attachment>,
    original_payload: Option<Payload>,
    cached_bytes: Option<Vec<u8>>,
    session: Option<Session>,
    access: AccessControl,
    context: Arc<EsbContext>,
}

impl Message {
    /// A message holding `payload`.
    pub fn new(payload: impl Into<Payload>, context: Arc<EsbContext>) -> Self {
        let payload = payload.into();
        let data_type = DataType::new(payload.type_ref());
        Self::from_body(Body::Simple(payload), data_type, context)
    }

    /// A message with no payload.
    pub fn null(context: Arc<EsbContext>) -> Self {
        Self::new(Payload::null(), context)
    }

    /// Start building a message.
    pub fn builder(payload: impl Into<Payload>, context: Arc<EsbContext>) -> MessageBuilder {
        MessageBuilder::new(payload.into(), context)
    }

    /// A collection of member messages.
    pub fn collection(members: Vec<Message>, context: Arc<EsbContext>) -> Self {
        Self::from_body(
            Body::Collection(Members::new(members)),
            DataType::of::<Vec<Payload>>(),
            context,
        )
    }

    /// A message replacing the payload of `previous`.
    ///
    /// Keeps the id, root id, properties, attachments, exception payload,
    /// session and encoding of `previous`. The original payload is the one
    /// `previous` recorded, or its payload if it recorded none.
    pub fn derive(payload: impl Into<Payload>, previous: &Message) -> Self {
        let payload = payload.into();
        let data_type = DataType::new(payload.type_ref()).with_encoding(previous.encoding());
        Self::derive_with_type(payload, previous, data_type)
    }

    /// Like [`Message::derive`], with an explicit data type.
    pub fn derive_with_type(
        payload: impl Into<Payload>,
        previous: &Message,
        data_type: DataType,
    ) -> Self {
        previous.touch();
        let original_payload = if previous.config_caches_original() {
            previous
                .original_payload
                .clone()
                .or_else(|| Some(previous.payload().clone()))
        } else {
            None
        };
        Self {
            id: previous.id,
            root_id: previous.root_id,
            body: Body::Simple(payload.into()),
            data_type,
            exception_payload: previous.exception_payload.clone(),
            properties: previous.properties.clone(),
            inbound_attachments: previous.inbound_attachments.clone(),
            outbound_attachments: previous.outbound_attachments.clone(),
            original_payload,
            cached_bytes: None,
            session: previous.session.clone(),
            access: AccessControl::new(),
            context: Arc::clone(&previous.context),
        }
    }

    fn from_body(body: Body, data_type: DataType, context: Arc<EsbContext>) -> Self {
        let id = Uuid::new_v4();
        let original_payload = context
            .configuration()
            .cache_message_original_payload
            .then(|| body.payload().clone());
        Self {
            id,
            root_id: id,
            body,
            data_type,
            exception_payload: None,
            properties: ScopedPropertyStore::new(),
            inbound_attachments: BTreeMap::new(),
            outbound_attachments: BTreeMap::new(),
            original_payload,
            cached_bytes: None,
            session: None,
            access: AccessControl::new(),
            context,
        }
    }

    fn config_caches_original(&self) -> bool {
        self.context.configuration().cache_message_original_payload
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Unique id, shared by messages derived from this one.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Id of the message this one originates from.
    pub fn root_id(&self) -> Uuid {
        self.root_id
    }

    /// Replace the id.
    pub fn set_unique_id(&mut self, id: Uuid) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.id = id;
        Ok(())
    }

    /// Replace the root id.
    pub fn set_root_id(&mut self, root_id: Uuid) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.root_id = root_id;
        Ok(())
    }

    /// Adopt the root id of `parent`, for messages split off another one.
    pub fn propagate_root_id(&mut self, parent: &Message) -> Result<(), MessageError> {
        self.set_root_id(parent.root_id)
    }

    /// The runtime context.
    pub fn context(&self) -> &Arc<EsbContext> {
        &self.context
    }

    /// Session of the event wrapping this message.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub(crate) fn bind_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    // ------------------------------------------------------------------
    // Payload
    // ------------------------------------------------------------------

    /// The payload. For a collection, the list of member payloads.
    pub fn payload(&self) -> &Payload {
        self.body.payload()
    }

    /// The payload as `T`.
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload().downcast_ref::<T>()
    }

    /// Data type of the payload.
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// The payload this message was first created with, if recorded.
    pub fn original_payload(&self) -> Option<&Payload> {
        self.original_payload.as_ref()
    }

    /// Replace the payload, keeping MIME type and encoding.
    pub fn set_payload(&mut self, payload: impl Into<Payload>) -> Result<(), MessageError> {
        let payload = payload.into();
        let data_type = self.data_type.clone().with_type_ref(payload.type_ref());
        self.set_payload_with_type(payload, data_type)
    }

    /// Replace the payload and its data type.
    pub fn set_payload_with_type(
        &mut self,
        payload: impl Into<Payload>,
        data_type: DataType,
    ) -> Result<(), MessageError> {
        self.assert_access(true)?;
        let payload = payload.into();
        self.body = match self.body {
            Body::Simple(_) => Body::Simple(payload),
            Body::Collection(_) | Body::Invalidated(_) => Body::Invalidated(payload),
        };
        self.data_type = data_type;
        self.cached_bytes = None;
        Ok(())
    }

    /// Replace the data type without touching the payload.
    pub fn set_data_type(&mut self, data_type: DataType) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.data_type = data_type;
        Ok(())
    }

    fn current_data_type(&self, encoding: &str) -> DataType {
        DataType::new(self.payload().type_ref())
            .with_mime_type(self.data_type.mime_type())
            .with_encoding(encoding)
    }

    /// The payload converted to `target`.
    ///
    /// Returns the payload itself when it is already compatible. Otherwise a
    /// transformer is looked up through the context. A stream payload is
    /// replaced by the converted value since it cannot be read again.
    pub fn get_payload(&mut self, target: &DataType) -> Result<Payload, MessageError> {
        let encoding = self.encoding();
        self.convert_payload(target, &encoding)
    }

    /// The payload converted to `T`.
    pub fn get_payload_as<T: Any + Send + Sync>(&mut self) -> Result<Arc<T>, MessageError> {
        let target = DataType::of::<T>();
        let payload = self.get_payload(&target)?;
        payload.downcast_arc::<T>().ok_or_else(|| {
            TransformerError::TypeMismatch {
                transformer: "get_payload".to_owned(),
                expected: target,
                actual: payload.type_ref().name().to_owned(),
            }
            .into()
        })
    }

    fn convert_payload(&mut self, target: &DataType, encoding: &str) -> Result<Payload, MessageError> {
        let source = self.current_data_type(encoding);
        if target.is_compatible_with(&source) {
            return Ok(self.payload().clone());
        }

        let transformer = self
            .context
            .lookup_transformer(&source, target)
            .ok_or_else(|| TransformerError::NoTransformerFound {
                source_type: source.clone(),
                target_type: target.clone(),
            })?;
        debug!(
            transformer = transformer.name(),
            source = %source,
            target = %target,
            "converting payload"
        );

        let transformed = transformer.transform(&TransformRequest::new(self, None, encoding))?;
        let result = match transformed {
            Transformed::Value(payload) => payload,
            Transformed::Message(message) => message.payload().clone(),
        };
        if !target.type_ref().is_assignable_from(&result.type_ref()) {
            return Err(TransformerError::TypeMismatch {
                transformer: transformer.name().to_owned(),
                expected: target.clone(),
                actual: result.type_ref().name().to_owned(),
            }
            .into());
        }

        if source.is_stream_type() {
            self.set_payload(result.clone())?;
        }
        Ok(result)
    }

    /// The payload as bytes.
    pub fn payload_as_bytes(&mut self) -> Result<Vec<u8>, MessageError> {
        if self.is_collection() {
            return Err(MessageError::Unsupported("payload_as_bytes"));
        }
        if let Some(bytes) = self.payload().as_bytes() {
            return Ok(bytes.to_vec());
        }
        if let Some(bytes) = &self.cached_bytes {
            return Ok(bytes.clone());
        }
        let payload = self.get_payload(&DataType::of::<Vec<u8>>())?;
        let bytes = payload.as_bytes().map(<[u8]>::to_vec).unwrap_or_default();
        if self.context.configuration().cache_message_as_bytes {
            self.cached_bytes = Some(bytes.clone());
        }
        Ok(bytes)
    }

    /// The payload as text, decoded with `encoding` or the message encoding.
    pub fn payload_as_string(&mut self, encoding: Option<&str>) -> Result<String, MessageError> {
        if self.is_collection() {
            return Err(MessageError::Unsupported("payload_as_string"));
        }
        if let Some(text) = self.payload().as_str() {
            return Ok(text.to_owned());
        }
        let encoding = encoding.map_or_else(|| self.encoding(), str::to_owned);
        let payload = self.convert_payload(&DataType::of::<String>(), &encoding)?;
        Ok(payload.as_str().map(str::to_owned).unwrap_or_default())
    }

    /// Text for log lines. Never fails.
    pub fn payload_for_logging(&mut self) -> String {
        if self.is_collection() {
            return COLLECTION_LOGGING_PLACEHOLDER.to_owned();
        }
        match self.payload_as_string(None) {
            Ok(text) => text,
            Err(error) => {
                debug!(%error, "payload could not be rendered for logging");
                UNCONVERTIBLE_LOGGING_PLACEHOLDER.to_owned()
            }
        }
    }

    /// Whether reading the payload consumes it.
    pub fn is_consumable(&self) -> bool {
        self.payload().is_consumable()
    }

    // ------------------------------------------------------------------
    // Exception payload
    // ------------------------------------------------------------------

    /// Failure attached to this message.
    pub fn exception_payload(&self) -> Option<&ExceptionPayload> {
        self.exception_payload.as_ref()
    }

    /// Attach or clear a failure.
    pub fn set_exception_payload(
        &mut self,
        exception_payload: Option<ExceptionPayload>,
    ) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.exception_payload = exception_payload;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Store a property. `None` or a null value removes the key.
    pub fn set_property(
        &mut self,
        key: &str,
        value: Option<PropertyValue>,
        scope: PropertyScope,
    ) -> Result<(), MessageError> {
        self.set_property_with_type(key, value, scope, None)
    }

    /// Store a property with an explicit data type.
    ///
    /// SESSION-scope values are stored in the session without `data_type`;
    /// their data type is always derived from the value.
    pub fn set_property_with_type(
        &mut self,
        key: &str,
        value: Option<PropertyValue>,
        scope: PropertyScope,
        data_type: Option<DataType>,
    ) -> Result<(), MessageError> {
        self.assert_access(true)?;
        if value.as_ref().is_none_or(PropertyValue::is_null) {
            warn!(key, %scope, "property set to null, removing it");
        }
        if scope == PropertyScope::Session {
            let Some(session) = &self.session else {
                warn!(key, "no active session, session property not stored");
                return Err(MessageError::NoActiveSession {
                    key: key.to_owned(),
                });
            };
            session.set_property(key, value);
            return Ok(());
        }
        self.properties.set(key, value, scope, data_type);
        Ok(())
    }

    /// Store an INBOUND property.
    pub fn set_inbound_property(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), MessageError> {
        self.set_property(key, Some(value.into()), PropertyScope::Inbound)
    }

    /// Store an INVOCATION property.
    pub fn set_invocation_property(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), MessageError> {
        self.set_property(key, Some(value.into()), PropertyScope::Invocation)
    }

    /// Store an OUTBOUND property.
    pub fn set_outbound_property(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), MessageError> {
        self.set_property(key, Some(value.into()), PropertyScope::Outbound)
    }

    /// Store a SESSION property.
    pub fn set_session_property(
        &mut self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), MessageError> {
        self.set_property(key, Some(value.into()), PropertyScope::Session)
    }

    /// Read a property.
    pub fn property(&self, key: &str, scope: PropertyScope) -> Option<PropertyValue> {
        self.touch();
        match scope {
            PropertyScope::Session => self.session.as_ref()?.property(key),
            _ => self.properties.get(key, scope).cloned(),
        }
    }

    /// Read a property as `T`, falling back to `default` when absent.
    pub fn property_or<T: FromPropertyValue>(
        &self,
        key: &str,
        scope: PropertyScope,
        default: T,
    ) -> Result<T, MessageError> {
        match self.property(key, scope) {
            None => Ok(default),
            Some(value) => T::from_property(&value).ok_or_else(|| MessageError::WrongPropertyType {
                key: key.to_owned(),
                expected: T::KIND,
                actual: value.kind(),
            }),
        }
    }

    /// Read an INBOUND property.
    pub fn inbound_property(&self, key: &str) -> Option<PropertyValue> {
        self.property(key, PropertyScope::Inbound)
    }

    /// Read an INVOCATION property.
    pub fn invocation_property(&self, key: &str) -> Option<PropertyValue> {
        self.property(key, PropertyScope::Invocation)
    }

    /// Read an OUTBOUND property.
    pub fn outbound_property(&self, key: &str) -> Option<PropertyValue> {
        self.property(key, PropertyScope::Outbound)
    }

    /// Read a SESSION property.
    pub fn session_property(&self, key: &str) -> Option<PropertyValue> {
        self.property(key, PropertyScope::Session)
    }

    /// Data type a property was stored with.
    pub fn property_data_type(&self, key: &str, scope: PropertyScope) -> Option<DataType> {
        self.touch();
        match scope {
            PropertyScope::Session => self.session_property(key).map(|v| v.data_type()),
            _ => self.properties.data_type(key, scope).cloned(),
        }
    }

    /// Remove a property.
    pub fn remove_property(
        &mut self,
        key: &str,
        scope: PropertyScope,
    ) -> Result<Option<PropertyValue>, MessageError> {
        self.assert_access(true)?;
        Ok(match scope {
            PropertyScope::Session => self.session.as_ref().and_then(|s| s.remove_property(key)),
            _ => self.properties.remove(key, scope),
        })
    }

    /// Remove a property from OUTBOUND, falling back to INVOCATION.
    pub fn remove_property_any(&mut self, key: &str) -> Result<Option<PropertyValue>, MessageError> {
        self.assert_access(true)?;
        Ok(self.properties.remove_any(key))
    }

    /// Remove every property in a scope.
    pub fn clear_properties(&mut self, scope: PropertyScope) -> Result<(), MessageError> {
        self.assert_access(true)?;
        match scope {
            PropertyScope::Session => {
                if let Some(session) = &self.session {
                    session.clear_properties();
                }
            }
            _ => self.properties.clear(scope),
        }
        Ok(())
    }

    /// Remove every INVOCATION and OUTBOUND property. INBOUND is read-only.
    pub fn clear_properties_all(&mut self) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.properties.clear(PropertyScope::Invocation);
        self.properties.clear(PropertyScope::Outbound);
        Ok(())
    }

    /// Property names in a scope, sorted.
    pub fn property_names(&self, scope: PropertyScope) -> Vec<String> {
        self.touch();
        match scope {
            PropertyScope::Session => self
                .session
                .as_ref()
                .map(Session::property_names)
                .unwrap_or_default(),
            _ => self.properties.names(scope),
        }
    }

    /// Property names across INBOUND, INVOCATION and OUTBOUND.
    pub fn all_property_names(&self) -> Vec<String> {
        self.touch();
        self.properties.property_names()
    }

    /// First value for `key` in the given scopes.
    pub fn find_property_in_scopes(
        &self,
        key: &str,
        scopes: &[PropertyScope],
    ) -> Option<PropertyValue> {
        scopes.iter().find_map(|scope| self.property(key, *scope))
    }

    /// First value for `key`, searching OUTBOUND, INVOCATION, SESSION, INBOUND.
    pub fn find_property_in_any_scope(&self, key: &str) -> Option<PropertyValue> {
        self.find_property_in_scopes(key, &PropertyScope::ALL)
    }

    /// Store several properties in one scope.
    pub fn add_properties<K, I>(&mut self, properties: I, scope: PropertyScope) -> Result<(), MessageError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, PropertyValue)>,
    {
        for (key, value) in properties {
            self.set_property(key.as_ref(), Some(value), scope)?;
        }
        Ok(())
    }

    /// Copy of every property in a scope.
    pub fn scoped_properties(&self, scope: PropertyScope) -> BTreeMap<String, TypedProperty> {
        self.touch();
        match scope {
            PropertyScope::Session => self
                .session
                .iter()
                .flat_map(|session| {
                    session.property_names().into_iter().filter_map(move |key| {
                        let value = session.property(&key)?;
                        Some((key, TypedProperty::new(value, None)))
                    })
                })
                .collect(),
            _ => self.properties.scoped_properties(scope),
        }
    }

    // ------------------------------------------------------------------
    // Well-known properties
    // ------------------------------------------------------------------

    /// Set the correlation id. `None` or a blank id removes it.
    pub fn set_correlation_id(&mut self, id: Option<&str>) -> Result<(), MessageError> {
        let value = id
            .filter(|id| !id.trim().is_empty())
            .map(PropertyValue::from);
        self.set_property(names::CORRELATION_ID, value, PropertyScope::Outbound)
    }

    /// Correlation id, from OUTBOUND or else INBOUND.
    pub fn correlation_id(&self) -> Option<String> {
        self.find_property_in_scopes(
            names::CORRELATION_ID,
            &[PropertyScope::Outbound, PropertyScope::Inbound],
        )
        .map(|v| v.to_string())
    }

    /// Set the position within the correlation group.
    pub fn set_correlation_sequence(&mut self, sequence: i64) -> Result<(), MessageError> {
        self.set_outbound_property(names::CORRELATION_SEQUENCE, sequence)
    }

    /// Position within the correlation group, `-1` when unknown.
    pub fn correlation_sequence(&self) -> i64 {
        self.correlation_number(names::CORRELATION_SEQUENCE)
    }

    /// Set the expected size of the correlation group.
    pub fn set_correlation_group_size(&mut self, size: i64) -> Result<(), MessageError> {
        self.set_outbound_property(names::CORRELATION_GROUP_SIZE, size)
    }

    /// Expected size of the correlation group, `-1` when unknown.
    pub fn correlation_group_size(&self) -> i64 {
        self.correlation_number(names::CORRELATION_GROUP_SIZE)
    }

    fn correlation_number(&self, key: &str) -> i64 {
        self.find_property_in_scopes(key, &[PropertyScope::Outbound, PropertyScope::Inbound])
            .and_then(|v| v.as_i64())
            .unwrap_or(-1)
    }

    /// Set the reply destination. `None` removes it from OUTBOUND and INBOUND.
    pub fn set_reply_to(&mut self, reply_to: Option<PropertyValue>) -> Result<(), MessageError> {
        if reply_to.is_none() {
            self.assert_access(true)?;
            self.properties.remove(names::REPLY_TO, PropertyScope::Inbound);
        }
        self.set_property(names::REPLY_TO, reply_to, PropertyScope::Outbound)
    }

    /// Reply destination, from OUTBOUND or else INBOUND.
    pub fn reply_to(&self) -> Option<PropertyValue> {
        self.find_property_in_scopes(
            names::REPLY_TO,
            &[PropertyScope::Outbound, PropertyScope::Inbound],
        )
    }

    /// Encoding: the data type's, else the OUTBOUND encoding property, else
    /// the configured default.
    pub fn encoding(&self) -> String {
        if let Some(encoding) = self.data_type.encoding() {
            return encoding.to_owned();
        }
        self.properties
            .get(names::ENCODING, PropertyScope::Outbound)
            .and_then(PropertyValue::as_str)
            .map_or_else(|| self.context.default_encoding().to_owned(), str::to_owned)
    }

    /// Set the encoding on the data type and as an OUTBOUND property.
    pub fn set_encoding(&mut self, encoding: &str) -> Result<(), MessageError> {
        self.set_outbound_property(names::ENCODING, encoding)?;
        self.data_type.set_encoding(Some(encoding.to_owned()));
        Ok(())
    }

    /// Set the MIME type, publishing it as the OUTBOUND content type unless
    /// it is the wildcard.
    pub fn set_mime_type(&mut self, mime_type: &str) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.data_type.set_mime_type(mime_type);
        if self.data_type.mime_type() != mime::ANY {
            let content_type = match self.data_type.encoding() {
                Some(encoding) => format!("{};charset={encoding}", self.data_type.mime_type()),
                None => self.data_type.mime_type().to_owned(),
            };
            self.set_outbound_property(names::CONTENT_TYPE, content_type)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    /// Attach a value for the next hop.
    pub fn add_outbound_attachment(
        &mut self,
        name: impl Into<String>,
        attachment: Attachment,
    ) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.outbound_attachments.insert(name.into(), attachment);
        Ok(())
    }

    /// Remove an outbound attachment.
    pub fn remove_outbound_attachment(&mut self, name: &str) -> Result<Option<Attachment>, MessageError> {
        self.assert_access(true)?;
        Ok(self.outbound_attachments.remove(name))
    }

    /// An outbound attachment.
    pub fn outbound_attachment(&self, name: &str) -> Option<&Attachment> {
        self.touch();
        self.outbound_attachments.get(name)
    }

    /// Outbound attachment names, sorted.
    pub fn outbound_attachment_names(&self) -> Vec<String> {
        self.touch();
        self.outbound_attachments.keys().cloned().collect()
    }

    /// Record an attachment received with the message.
    pub fn add_inbound_attachment(
        &mut self,
        name: impl Into<String>,
        attachment: Attachment,
    ) -> Result<(), MessageError> {
        self.assert_access(true)?;
        self.inbound_attachments.insert(name.into(), attachment);
        Ok(())
    }

    /// An inbound attachment.
    pub fn inbound_attachment(&self, name: &str) -> Option<&Attachment> {
        self.touch();
        self.inbound_attachments.get(name)
    }

    /// Inbound attachment names, sorted.
    pub fn inbound_attachment_names(&self) -> Vec<String> {
        self.touch();
        self.inbound_attachments.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Copies
    // ------------------------------------------------------------------

    /// The message as the next hop receives it: OUTBOUND properties and
    /// attachments become INBOUND, the other scopes start empty, and
    /// correlation, reply-to and encoding carry over.
    pub fn create_inbound_message(&self) -> Result<Message, MessageError> {
        let mut message =
            Message::derive_with_type(self.payload().clone(), self, self.data_type.clone());
        message.properties = self.properties.promote_outbound_to_inbound();
        message.inbound_attachments = self.outbound_attachments.clone();
        message.outbound_attachments.clear();

        if let Some(id) = self.correlation_id() {
            message.set_correlation_id(Some(&id))?;
        }
        if self.correlation_sequence() >= 0 {
            message.set_correlation_sequence(self.correlation_sequence())?;
        }
        if self.correlation_group_size() >= 0 {
            message.set_correlation_group_size(self.correlation_group_size())?;
        }
        if let Some(reply_to) = self.reply_to() {
            message.set_reply_to(Some(reply_to))?;
        }
        message.set_encoding(&self.encoding())?;
        Ok(message)
    }

    /// A copy that any thread may claim.
    pub fn new_thread_copy(&self) -> Message {
        Message {
            id: self.id,
            root_id: self.root_id,
            body: self.body.thread_copy(),
            data_type: self.data_type.clone(),
            exception_payload: self.exception_payload.clone(),
            properties: self.properties.clone(),
            inbound_attachments: self.inbound_attachments.clone(),
            outbound_attachments: self.outbound_attachments.clone(),
            original_payload: self.original_payload.clone(),
            cached_bytes: self.cached_bytes.clone(),
            session: self.session.clone(),
            access: AccessControl::new(),
            context: Arc::clone(&self.context),
        }
    }

    // ------------------------------------------------------------------
    // Access control
    // ------------------------------------------------------------------

    /// Check that the current thread may read or write.
    pub fn assert_access(&self, write: bool) -> Result<(), AccessError> {
        self.access
            .check(write, &self.context.configuration().access_control)
    }

    fn touch(&self) {
        self.access
            .touch(&self.context.configuration().access_control);
    }

    /// Forget the owner and make the message writable again.
    pub fn reset_access_control(&mut self) {
        self.access.reset();
        if let Body::Collection(members) = &mut self.body {
            for member in &mut members.messages {
                member.reset_access_control();
            }
        }
    }

    /// Reject every further write.
    pub fn mark_immutable(&mut self) {
        self.access.mark_immutable();
    }

    /// Thread that owns the message, once claimed.
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.access.owner()
    }

    /// Whether writes are still accepted.
    pub fn is_mutable(&self) -> bool {
        self.access.is_mutable()
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    /// Whether this is a valid collection.
    pub fn is_collection(&self) -> bool {
        matches!(self.body, Body::Collection(_))
    }

    /// Whether this was a collection whose payload has been replaced.
    pub fn is_invalidated_payload(&self) -> bool {
        matches!(self.body, Body::Invalidated(_))
    }

    fn members(&self) -> Result<&Members, MessageError> {
        match &self.body {
            Body::Collection(members) => Ok(members),
            Body::Invalidated(_) => Err(MessageError::InvalidatedCollection),
            Body::Simple(_) => Err(MessageError::NotACollection),
        }
    }

    fn members_mut(&mut self) -> Result<&mut Members, MessageError> {
        self.assert_access(true)?;
        match &mut self.body {
            Body::Collection(members) => Ok(members),
            Body::Invalidated(_) => Err(MessageError::InvalidatedCollection),
            Body::Simple(_) => Err(MessageError::NotACollection),
        }
    }

    /// Append a member.
    pub fn add_message(&mut self, message: Message) -> Result<(), MessageError> {
        let members = self.members_mut()?;
        members.messages.push(message);
        members.refresh();
        Ok(())
    }

    /// Insert a member at `index`. Indices past the end append.
    pub fn add_message_at(&mut self, index: usize, message: Message) -> Result<(), MessageError> {
        let members = self.members_mut()?;
        let index = index.min(members.messages.len());
        members.messages.insert(index, message);
        members.refresh();
        Ok(())
    }

    /// Remove the member with the given id.
    pub fn remove_message(&mut self, id: Uuid) -> Result<Option<Message>, MessageError> {
        let members = self.members_mut()?;
        let Some(position) = members.messages.iter().position(|m| m.id == id) else {
            return Ok(None);
        };
        let removed = members.messages.remove(position);
        members.refresh();
        Ok(Some(removed))
    }

    /// The member at `index`.
    pub fn message(&self, index: usize) -> Result<Option<&Message>, MessageError> {
        Ok(self.members()?.messages.get(index))
    }

    /// Every member.
    pub fn messages(&self) -> Result<&[Message], MessageError> {
        Ok(&self.members()?.messages)
    }

    /// Thread copies of every member.
    pub fn messages_as_array(&self) -> Result<Vec<Message>, MessageError> {
        Ok(self
            .members()?
            .messages
            .iter()
            .map(Message::new_thread_copy)
            .collect())
    }

    /// Number of members.
    pub fn message_count(&self) -> Result<usize, MessageError> {
        Ok(self.members()?.messages.len())
    }

    /// Apply `f` to every member, refreshing the payload list afterwards.
    pub fn map_members<T, E: From<MessageError>>(
        &mut self,
        mut f: impl FnMut(&mut Message) -> Result<T, E>,
    ) -> Result<Vec<T>, E> {
        let members = self.members_mut()?;
        let results = members
            .messages
            .iter_mut()
            .map(&mut f)
            .collect::<Result<Vec<T>, E>>();
        members.refresh();
        results
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("payload", self.payload())
            .field("data_type", &self.data_type)
            .field(
                "correlation_id",
                &self
                    .properties
                    .get(names::CORRELATION_ID, PropertyScope::Outbound),
            )
            .field("collection", &self.is_collection())
            .field("exception_payload", &self.exception_payload)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Message`].
#[must_use]
pub struct MessageBuilder {
    payload: Payload,
    context: Arc<EsbContext>,
    data_type: Option<DataType>,
    mime_type: Option<String>,
    encoding: Option<String>,
    properties: ScopedPropertyStore,
    inbound_attachments: BTreeMap<String, Attachment>,
    outbound_attachments: BTreeMap<String, Attachment>,
    id: Option<Uuid>,
    root_id: Option<Uuid>,
}

impl MessageBuilder {
    fn new(payload: Payload, context: Arc<EsbContext>) -> Self {
        Self {
            payload,
            context,
            data_type: None,
            mime_type: None,
            encoding: None,
            properties: ScopedPropertyStore::new(),
            inbound_attachments: BTreeMap::new(),
            outbound_attachments: BTreeMap::new(),
            id: None,
            root_id: None,
        }
    }

    /// Use an explicit data type.
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Set the MIME type.
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the encoding.
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Add an INBOUND property.
    pub fn inbound_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties
            .set(key, Some(value.into()), PropertyScope::Inbound, None);
        self
    }

    /// Add several INBOUND properties.
    pub fn inbound_properties<K, I>(mut self, properties: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, PropertyValue)>,
    {
        self.properties.add_inbound_properties(properties);
        self
    }

    /// Add an INVOCATION property.
    pub fn invocation_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties
            .set(key, Some(value.into()), PropertyScope::Invocation, None);
        self
    }

    /// Add an OUTBOUND property.
    pub fn outbound_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties
            .set(key, Some(value.into()), PropertyScope::Outbound, None);
        self
    }

    /// Add an inbound attachment.
    pub fn inbound_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.inbound_attachments.insert(name.into(), attachment);
        self
    }

    /// Add an outbound attachment.
    pub fn outbound_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.outbound_attachments.insert(name.into(), attachment);
        self
    }

    /// Use a fixed id.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Use a fixed root id. Defaults to the id.
    pub fn root_id(mut self, root_id: Uuid) -> Self {
        self.root_id = Some(root_id);
        self
    }

    /// Finish.
    pub fn build(self) -> Message {
        let mut data_type = self
            .data_type
            .unwrap_or_else(|| DataType::new(self.payload.type_ref()));
        if let Some(mime_type) = self.mime_type {
            data_type.set_mime_type(mime_type);
        }
        if let Some(encoding) = self.encoding {
            data_type.set_encoding(Some(encoding));
        }

        let mut message = Message::from_body(Body::Simple(self.payload), data_type, self.context);
        if let Some(id) = self.id {
            message.id = id;
            message.root_id = id;
        }
        if let Some(root_id) = self.root_id {
            message.root_id = root_id;
        }
        message.properties = self.properties;
        message.inbound_attachments = self.inbound_attachments;
        message.outbound_attachments = self.outbound_attachments;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::error::TransformerError;
    use crate::payload::PayloadStream;
    use crate::transformer::{
        DataTypeConversionResolver, Transformer, TransformerLookup,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct StreamToBytes {
        sources: Vec<DataType>,
        returns: DataType,
        calls: AtomicUsize,
    }

    impl Transformer for StreamToBytes {
        fn name(&self) -> &str {
            "stream-to-bytes"
        }
        fn source_data_types(&self) -> &[DataType] {
            &self.sources
        }
        fn return_data_type(&self) -> &DataType {
            &self.returns
        }
        fn transform(&self, request: &TransformRequest<'_>) -> Result<Transformed, TransformerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stream = request
                .payload_ref::<PayloadStream>()
                .ok_or(TransformerError::StreamConsumed)?;
            let bytes = stream.read_all().map_err(|e| TransformerError::Failed {
                transformer: self.name().to_owned(),
                cause: Box::new(e),
            })?;
            Ok(Payload::new(bytes).into())
        }
    }

    struct Lookup(Arc<StreamToBytes>);

    impl TransformerLookup for Lookup {
        fn lookup_transformer(&self, source: &DataType, target: &DataType) -> Option<Arc<dyn Transformer>> {
            (self.0.is_source_data_type_supported(source)
                && target.is_compatible_with(self.0.return_data_type()))
            .then(|| self.0.clone() as Arc<dyn Transformer>)
        }
    }

    impl DataTypeConversionResolver for Lookup {
        fn resolve(&self, _: &DataType, _: &[DataType]) -> Option<Arc<dyn Transformer>> {
            None
        }
    }

    fn context() -> Arc<EsbContext> {
        EsbContext::new(Configuration::default())
    }

    fn stream_context() -> (Arc<EsbContext>, Arc<StreamToBytes>) {
        let transformer = Arc::new(StreamToBytes {
            sources: vec![DataType::stream()],
            returns: DataType::bytes(),
            calls: AtomicUsize::new(0),
        });
        let context = EsbContext::builder()
            .transformers(Arc::new(Lookup(transformer.clone())))
            .build();
        (context, transformer)
    }

    #[test]
    fn test_new_message_records_original_payload() {
        let message = Message::new("hello", context());
        assert_eq!(message.payload_ref::<String>().map(String::as_str), Some("hello"));
        assert!(message.original_payload().unwrap().ptr_eq(message.payload()));
        assert_eq!(message.id(), message.root_id());
    }

    #[test]
    fn test_compatible_get_payload_returns_same_reference() {
        let mut message = Message::new("hello", context());
        let payload = message.get_payload(&DataType::object()).unwrap();
        assert!(payload.ptr_eq(message.payload()));
    }

    #[test]
    fn test_missing_transformer() {
        let mut message = Message::new("hello", context());
        let err = message.get_payload(&DataType::bytes()).unwrap_err();
        assert!(matches!(
            err,
            MessageError::Transformer(TransformerError::NoTransformerFound { .. })
        ));
    }

    #[test]
    fn test_stream_payload_is_replaced_after_conversion() {
        let (context, transformer) = stream_context();
        let mut message = Message::new(PayloadStream::from_bytes(b"abc".to_vec()), context);

        let first = message.get_payload(&DataType::bytes()).unwrap();
        assert_eq!(first.as_bytes(), Some(&b"abc"[..]));
        assert!(message.payload().is::<Vec<u8>>());

        let second = message.get_payload(&DataType::bytes()).unwrap();
        assert!(second.ptr_eq(&first));
        assert_eq!(transformer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_result_of_wrong_type_is_a_mismatch() {
        let transformer = Arc::new(StreamToBytes {
            sources: vec![DataType::stream()],
            returns: DataType::string(),
            calls: AtomicUsize::new(0),
        });
        let context = EsbContext::builder()
            .transformers(Arc::new(Lookup(transformer.clone())))
            .build();
        let mut message = Message::new(PayloadStream::from_bytes(b"abc".to_vec()), context);

        let err = message.get_payload(&DataType::string()).unwrap_err();
        match err {
            MessageError::Transformer(TransformerError::TypeMismatch {
                transformer,
                expected,
                actual,
            }) => {
                assert_eq!(transformer, "stream-to-bytes");
                assert!(expected.type_ref().is::<String>());
                assert!(actual.contains("Vec<u8>"));
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
        assert_eq!(transformer.calls.load(Ordering::SeqCst), 1);
        assert!(message.payload().is::<PayloadStream>());
    }

    #[test]
    fn test_null_value_removes_property() {
        let mut message = Message::new("x", context());
        message.set_outbound_property("k", "v").unwrap();
        message.set_property("k", None, PropertyScope::Outbound).unwrap();
        assert!(message.outbound_property("k").is_none());
    }

    #[test]
    fn test_property_lookup_order() {
        let mut message = Message::builder("x", context())
            .inbound_property("k", "inbound")
            .build();
        assert_eq!(message.find_property_in_any_scope("k"), Some("inbound".into()));

        message.set_invocation_property("k", "invocation").unwrap();
        assert_eq!(message.find_property_in_any_scope("k"), Some("invocation".into()));

        message.set_outbound_property("k", "outbound").unwrap();
        assert_eq!(message.find_property_in_any_scope("k"), Some("outbound".into()));
    }

    #[test]
    fn test_typed_property_read() {
        let mut message = Message::new("x", context());
        message.set_outbound_property("count", "12").unwrap();

        assert_eq!(message.property_or("count", PropertyScope::Outbound, 0i64).unwrap(), 12);
        assert_eq!(message.property_or("missing", PropertyScope::Outbound, 7i64).unwrap(), 7);
        assert!(matches!(
            message.property_or("count", PropertyScope::Outbound, false),
            Err(MessageError::WrongPropertyType { .. })
        ));
    }

    #[test]
    fn test_session_write_without_session_fails() {
        let mut message = Message::new("x", context());
        let err = message.set_session_property("k", 1).unwrap_err();
        assert!(matches!(err, MessageError::NoActiveSession { .. }));
        assert!(message.session_property("k").is_none());
    }

    #[test]
    fn test_session_write_with_bound_session() {
        let session = Session::new();
        let mut message = Message::new("x", context());
        message.bind_session(session.clone());

        message.set_session_property("user", "ada").unwrap();
        assert_eq!(session.property("user"), Some("ada".into()));
        assert_eq!(message.property_names(PropertyScope::Session), vec!["user".to_owned()]);
    }

    #[test]
    fn test_session_property_type_follows_value() {
        let mut message = Message::new("x", context());
        message.bind_session(Session::new());

        message
            .set_property_with_type(
                "doc",
                Some("{}".into()),
                PropertyScope::Session,
                Some(DataType::string().with_mime_type(mime::JSON)),
            )
            .unwrap();
        assert_eq!(
            message.property_data_type("doc", PropertyScope::Session),
            Some(DataType::string())
        );
    }

    #[test]
    fn test_attachment_name_reads_claim_ownership() {
        let message = Message::new("x", context());

        let reader = thread::scope(|s| {
            s.spawn(|| {
                assert!(message.inbound_attachment_names().is_empty());
                assert!(message.outbound_attachment_names().is_empty());
                thread::current().id()
            })
            .join()
            .unwrap()
        });
        assert_eq!(message.owner_thread(), Some(reader));
    }

    #[test]
    fn test_clear_properties_all_keeps_inbound() {
        let mut message = Message::builder("x", context())
            .inbound_property("in", 1)
            .outbound_property("out", 2)
            .invocation_property("inv", 3)
            .build();

        message.clear_properties_all().unwrap();
        assert_eq!(message.all_property_names(), vec!["in".to_owned()]);
    }

    #[test]
    fn test_correlation_defaults_and_blank_removal() {
        let mut message = Message::new("x", context());
        assert_eq!(message.correlation_sequence(), -1);
        assert_eq!(message.correlation_group_size(), -1);

        message.set_correlation_id(Some("abc")).unwrap();
        assert_eq!(message.correlation_id().as_deref(), Some("abc"));
        message.set_correlation_id(Some("  ")).unwrap();
        assert!(message.correlation_id().is_none());
    }

    #[test]
    fn test_correlation_falls_back_to_inbound() {
        let message = Message::builder("x", context())
            .inbound_property(names::CORRELATION_ID, "in-id")
            .inbound_property(names::CORRELATION_SEQUENCE, 3)
            .build();
        assert_eq!(message.correlation_id().as_deref(), Some("in-id"));
        assert_eq!(message.correlation_sequence(), 3);
    }

    #[test]
    fn test_encoding_resolution() {
        let mut message = Message::new("x", context());
        assert_eq!(message.encoding(), "UTF-8");

        message.set_outbound_property(names::ENCODING, "US-ASCII").unwrap();
        assert_eq!(message.encoding(), "US-ASCII");

        message.set_encoding("ISO-8859-1").unwrap();
        assert_eq!(message.encoding(), "ISO-8859-1");
    }

    #[test]
    fn test_mime_type_sets_content_type() {
        let mut message = Message::builder("x", context()).encoding("UTF-8").build();
        message.set_mime_type(mime::JSON).unwrap();
        assert_eq!(
            message.outbound_property(names::CONTENT_TYPE),
            Some("application/json;charset=UTF-8".into())
        );

        let mut message = Message::new("x", context());
        message.set_mime_type(mime::ANY).unwrap();
        assert!(message.outbound_property(names::CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_create_inbound_message() {
        let mut message = Message::builder("x", context())
            .inbound_property("old", "gone")
            .build();
        message.set_outbound_property("next", "hop").unwrap();
        message.set_invocation_property("local", 1).unwrap();
        message.set_correlation_id(Some("c-1")).unwrap();
        message
            .add_outbound_attachment("doc", Attachment::bytes(b"%PDF".to_vec(), "application/pdf"))
            .unwrap();

        let inbound = message.create_inbound_message().unwrap();

        assert_eq!(inbound.inbound_property("next"), Some("hop".into()));
        assert!(inbound.inbound_property("old").is_none());
        assert!(inbound.invocation_property("local").is_none());
        assert_eq!(inbound.correlation_id().as_deref(), Some("c-1"));
        assert!(inbound.inbound_attachment("doc").is_some());
        assert!(inbound.outbound_attachment_names().is_empty());
        assert_eq!(inbound.id(), message.id());
    }

    #[test]
    fn test_derive_keeps_identity_and_metadata() {
        let mut message = Message::new("x", context());
        message.set_outbound_property("k", "v").unwrap();
        message.set_encoding("ISO-8859-1").unwrap();

        let derived = Message::derive(b"x".to_vec(), &message);
        assert_eq!(derived.id(), message.id());
        assert_eq!(derived.outbound_property("k"), Some("v".into()));
        assert_eq!(derived.encoding(), "ISO-8859-1");
        assert!(derived.original_payload().unwrap().ptr_eq(message.payload()));
        assert!(derived.data_type().type_ref().is::<Vec<u8>>());
    }

    #[test]
    fn test_owner_thread_writes_and_others_fail() {
        let mut message = Message::new("x", context());
        message.set_outbound_property("a", 1).unwrap();

        let result = thread::scope(|s| {
            s.spawn(|| {
                let message = &message;
                message.assert_access(true)
            })
            .join()
        });
        assert!(matches!(result.unwrap(), Err(AccessError::NonOwnerWrite { .. })));
    }

    #[test]
    fn test_thread_copy_can_be_claimed_by_another_thread() {
        let mut message = Message::new("x", context());
        message.set_outbound_property("a", 1).unwrap();
        let mut copy = message.new_thread_copy();

        let handle = thread::spawn(move || {
            copy.set_outbound_property("b", 2)?;
            Ok::<_, MessageError>(copy)
        });
        let copy = handle.join().unwrap().unwrap();
        assert_eq!(copy.outbound_property("b"), Some(2.into()));
        assert!(message.outbound_property("b").is_none());
    }

    #[test]
    fn test_moved_message_rejects_writes_until_reset() {
        let mut message = Message::new("x", context());
        message.set_outbound_property("a", 1).unwrap();

        let mut message = thread::spawn(move || {
            assert!(matches!(
                message.set_outbound_property("b", 2),
                Err(MessageError::Access(AccessError::NonOwnerWrite { .. }))
            ));
            message.reset_access_control();
            message.set_outbound_property("b", 2).unwrap();
            message
        })
        .join()
        .unwrap();

        message.reset_access_control();
        assert!(message.set_outbound_property("c", 3).is_ok());
    }

    #[test]
    fn test_immutable_message() {
        let mut message = Message::new("x", context());
        message.mark_immutable();
        assert!(matches!(
            message.set_payload("y"),
            Err(MessageError::Access(AccessError::ImmutableWrite))
        ));
        assert!(!message.is_mutable());
    }

    #[test]
    fn test_collection_payload_lists_members() {
        let ctx = context();
        let members = vec![Message::new("a", ctx.clone()), Message::new("b", ctx.clone())];
        let mut collection = Message::collection(members, ctx.clone());

        assert!(collection.is_collection());
        assert_eq!(collection.message_count().unwrap(), 2);

        collection.add_message(Message::new("c", ctx)).unwrap();
        let payloads = collection.payload_ref::<Vec<Payload>>().unwrap();
        let texts: Vec<&str> = payloads.iter().filter_map(Payload::as_str).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn test_collection_remove_and_insert() {
        let ctx = context();
        let first = Message::new("a", ctx.clone());
        let first_id = first.id();
        let mut collection = Message::collection(vec![first], ctx.clone());

        collection.add_message_at(0, Message::new("z", ctx)).unwrap();
        assert_eq!(
            collection.message(0).unwrap().and_then(|m| m.payload().as_str()),
            Some("z")
        );

        let removed = collection.remove_message(first_id).unwrap().unwrap();
        assert_eq!(removed.payload().as_str(), Some("a"));
        assert_eq!(collection.message_count().unwrap(), 1);
        assert!(collection.remove_message(first_id).unwrap().is_none());
    }

    #[test]
    fn test_replacing_collection_payload_invalidates_it() {
        let ctx = context();
        let mut collection = Message::collection(vec![Message::new("a", ctx.clone())], ctx.clone());

        collection.set_payload("flattened").unwrap();

        assert!(collection.is_invalidated_payload());
        assert!(!collection.is_collection());
        assert!(matches!(
            collection.add_message(Message::new("b", ctx)),
            Err(MessageError::InvalidatedCollection)
        ));
        assert!(matches!(
            collection.message_count(),
            Err(MessageError::InvalidatedCollection)
        ));

        collection.set_payload("again").unwrap();
        assert!(collection.is_invalidated_payload());
    }

    #[test]
    fn test_collection_ops_on_simple_message() {
        let message = Message::new("x", context());
        assert!(matches!(message.messages(), Err(MessageError::NotACollection)));
    }

    #[test]
    fn test_collection_text_access_is_unsupported() {
        let ctx = context();
        let mut collection = Message::collection(vec![Message::new("a", ctx.clone())], ctx);

        assert!(matches!(
            collection.payload_as_string(None),
            Err(MessageError::Unsupported(_))
        ));
        assert!(matches!(collection.payload_as_bytes(), Err(MessageError::Unsupported(_))));
        assert_eq!(collection.payload_for_logging(), "[This is a message collection]");
    }

    #[test]
    fn test_payload_for_logging_never_fails() {
        let mut message = Message::new(Payload::new(42u64), context());
        assert_eq!(
            message.payload_for_logging(),
            "[Message could not be converted to a String]"
        );
    }
}
