//! Scoped message properties.
//!
//! Properties live in one of four [`PropertyScope`]s. INBOUND, INVOCATION
//! and OUTBOUND are stored on the message in a [`ScopedPropertyStore`];
//! SESSION properties are held by the session the message travels in.
//!
//! Keys are case-insensitive within every scope.

use crate::data_type::DataType;
use crate::payload::Payload;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Names of properties the runtime itself reads and writes.
pub mod names {
    /// Correlation identifier shared by related messages.
    pub const CORRELATION_ID: &str = "ESTUARY_CORRELATION_ID";
    /// Position of a message within its correlation group.
    pub const CORRELATION_SEQUENCE: &str = "ESTUARY_CORRELATION_SEQUENCE";
    /// Expected number of messages in the correlation group.
    pub const CORRELATION_GROUP_SIZE: &str = "ESTUARY_CORRELATION_GROUP_SIZE";
    /// Reply destination.
    pub const REPLY_TO: &str = "ESTUARY_REPLYTO";
    /// Character encoding of the payload.
    pub const ENCODING: &str = "ESTUARY_ENCODING";
    /// Forces synchronous processing of the inbound event.
    pub const FORCE_SYNC: &str = "ESTUARY_FORCE_SYNC";
    /// Content type header.
    pub const CONTENT_TYPE: &str = "Content-Type";
}

/// A property namespace with its own lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyScope {
    /// Read-only properties received with the message.
    Inbound,
    /// Properties visible while the message is processed in one flow.
    Invocation,
    /// Properties sent with the message to the next hop.
    Outbound,
    /// Properties carried by the session across flows.
    Session,
}

impl PropertyScope {
    /// Lookup order used when searching every scope.
    pub const ALL: [PropertyScope; 4] = [
        PropertyScope::Outbound,
        PropertyScope::Invocation,
        PropertyScope::Session,
        PropertyScope::Inbound,
    ];

    /// Scope used when none is given.
    pub const DEFAULT: PropertyScope = PropertyScope::Outbound;

    /// Lower-case scope name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Invocation => "invocation",
            Self::Outbound => "outbound",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for PropertyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A property value.
#[derive(Clone, Debug)]
pub enum PropertyValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Any other value.
    Object(Payload),
}

impl PropertyValue {
    /// Whether this value stands for "no value".
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Object(payload) if payload.is_null())
    }

    /// Kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Object(_) => "object",
        }
    }

    /// Data type of the held value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::of::<bool>(),
            Self::Int(_) => DataType::of::<i64>(),
            Self::Float(_) => DataType::of::<f64>(),
            Self::String(_) => DataType::string(),
            Self::Bytes(_) => DataType::bytes(),
            Self::Object(payload) => DataType::new(payload.type_ref()),
        }
    }

    /// Text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Object(payload) => payload.as_str(),
            _ => None,
        }
    }

    /// Integer value. Strings are parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float value. Integers widen and strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value. Strings `true`/`false` are accepted in any case.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Self::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Byte value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Object(payload) => payload.as_bytes(),
            _ => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "[{} bytes]", b.len()),
            Self::Object(payload) => write!(f, "{payload:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Payload> for PropertyValue {
    fn from(value: Payload) -> Self {
        Self::Object(value)
    }
}

/// Conversion from a stored property to a concrete type.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be read from a property value",
    label = "unsupported property type",
    note = "Supported types are bool, i32, i64, f64, String and Vec<u8>."
)]
pub trait FromPropertyValue: Sized {
    /// Kind name used in error messages.
    const KIND: &'static str;

    /// Convert, returning `None` when the value has another kind.
    fn from_property(value: &PropertyValue) -> Option<Self>;
}

impl FromPropertyValue for bool {
    const KIND: &'static str = "bool";
    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromPropertyValue for i64 {
    const KIND: &'static str = "int";
    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_i64()
    }
}

impl FromPropertyValue for i32 {
    const KIND: &'static str = "int";
    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_i64().and_then(|v| i32::try_from(v).ok())
    }
}

impl FromPropertyValue for f64 {
    const KIND: &'static str = "float";
    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_f64()
    }
}

impl FromPropertyValue for String {
    const KIND: &'static str = "string";
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bytes(_) | PropertyValue::Object(_) => value.as_str().map(str::to_owned),
            other => Some(other.to_string()),
        }
    }
}

impl FromPropertyValue for Vec<u8> {
    const KIND: &'static str = "bytes";
    fn from_property(value: &PropertyValue) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

/// A value together with the data type it was stored with.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedProperty {
    /// The value.
    pub value: PropertyValue,
    /// Declared data type.
    pub data_type: DataType,
}

impl TypedProperty {
    /// Wrap a value, deriving the data type from it when none is given.
    pub fn new(value: PropertyValue, data_type: Option<DataType>) -> Self {
        let data_type = data_type.unwrap_or_else(|| value.data_type());
        Self { value, data_type }
    }
}

/// A map with case-insensitive string keys that remembers the spelling of
/// the most recent insertion.
#[derive(Clone, Debug)]
pub struct CaseInsensitiveMap<V> {
    entries: HashMap<String, (String, V)>,
}

impl<V> Default for CaseInsensitiveMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> CaseInsensitiveMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn fold(key: &str) -> String {
        key.to_lowercase()
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        self.entries
            .insert(Self::fold(key), (key.to_owned(), value))
            .map(|(_, previous)| previous)
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(&Self::fold(key)).map(|(_, v)| v)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(&Self::fold(key)).map(|(_, v)| v)
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&Self::fold(key))
    }

    /// Keys as last inserted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(k, _)| k.as_str())
    }

    /// Entries as `(key, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The message-local property scopes.
///
/// SESSION is not stored here: every operation on it is a no-op or returns
/// nothing, and the owning message resolves it against its session.
#[derive(Clone, Debug, Default)]
pub struct ScopedPropertyStore {
    inbound: CaseInsensitiveMap<TypedProperty>,
    invocation: CaseInsensitiveMap<TypedProperty>,
    outbound: CaseInsensitiveMap<TypedProperty>,
}

impl ScopedPropertyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, scope: PropertyScope) -> Option<&CaseInsensitiveMap<TypedProperty>> {
        match scope {
            PropertyScope::Inbound => Some(&self.inbound),
            PropertyScope::Invocation => Some(&self.invocation),
            PropertyScope::Outbound => Some(&self.outbound),
            PropertyScope::Session => None,
        }
    }

    fn map_mut(&mut self, scope: PropertyScope) -> Option<&mut CaseInsensitiveMap<TypedProperty>> {
        match scope {
            PropertyScope::Inbound => Some(&mut self.inbound),
            PropertyScope::Invocation => Some(&mut self.invocation),
            PropertyScope::Outbound => Some(&mut self.outbound),
            PropertyScope::Session => None,
        }
    }

    /// Store a value. `None` or a null value removes the key.
    pub fn set(
        &mut self,
        key: &str,
        value: Option<PropertyValue>,
        scope: PropertyScope,
        data_type: Option<DataType>,
    ) {
        let Some(map) = self.map_mut(scope) else {
            return;
        };
        match value {
            Some(value) if !value.is_null() => {
                map.insert(key, TypedProperty::new(value, data_type));
            }
            _ => {
                map.remove(key);
            }
        }
    }

    /// Look up a value.
    pub fn get(&self, key: &str, scope: PropertyScope) -> Option<&PropertyValue> {
        self.get_typed(key, scope).map(|p| &p.value)
    }

    /// Look up a value with its data type.
    pub fn get_typed(&self, key: &str, scope: PropertyScope) -> Option<&TypedProperty> {
        self.map(scope)?.get(key)
    }

    /// Data type a value was stored with.
    pub fn data_type(&self, key: &str, scope: PropertyScope) -> Option<&DataType> {
        self.get_typed(key, scope).map(|p| &p.data_type)
    }

    /// Remove a value from one scope.
    pub fn remove(&mut self, key: &str, scope: PropertyScope) -> Option<PropertyValue> {
        self.map_mut(scope)?.remove(key).map(|p| p.value)
    }

    /// Remove a value from OUTBOUND, falling back to INVOCATION.
    pub fn remove_any(&mut self, key: &str) -> Option<PropertyValue> {
        self.outbound
            .remove(key)
            .or_else(|| self.invocation.remove(key))
            .map(|p| p.value)
    }

    /// Remove every value in a scope.
    pub fn clear(&mut self, scope: PropertyScope) {
        if let Some(map) = self.map_mut(scope) {
            map.clear();
        }
    }

    /// Keys stored in a scope, sorted.
    pub fn names(&self, scope: PropertyScope) -> Vec<String> {
        let mut names: Vec<String> = self
            .map(scope)
            .map(|m| m.keys().map(str::to_owned).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Keys across INBOUND, INVOCATION and OUTBOUND, deduplicated ignoring
    /// case and sorted.
    pub fn property_names(&self) -> Vec<String> {
        let mut folded = BTreeMap::new();
        for map in [&self.inbound, &self.invocation, &self.outbound] {
            for key in map.keys() {
                folded
                    .entry(key.to_lowercase())
                    .or_insert_with(|| key.to_owned());
            }
        }
        let mut names: Vec<String> = folded.into_values().collect();
        names.sort();
        names
    }

    /// Bulk-load INBOUND properties.
    pub fn add_inbound_properties<K, I>(&mut self, properties: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, PropertyValue)>,
    {
        for (key, value) in properties {
            self.set(key.as_ref(), Some(value), PropertyScope::Inbound, None);
        }
    }

    /// Copy of every value in a scope.
    pub fn scoped_properties(&self, scope: PropertyScope) -> BTreeMap<String, TypedProperty> {
        self.map(scope)
            .map(|m| m.iter().map(|(k, v)| (k.to_owned(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Replace INBOUND with a copy of OUTBOUND, clearing the other scopes.
    pub(crate) fn promote_outbound_to_inbound(&self) -> ScopedPropertyStore {
        ScopedPropertyStore {
            inbound: self.outbound.clone(),
            ..ScopedPropertyStore::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut store = ScopedPropertyStore::new();
        store.set("Foo", Some("bar".into()), PropertyScope::Outbound, None);

        assert_eq!(
            store.get("FOO", PropertyScope::Outbound),
            Some(&PropertyValue::from("bar"))
        );
        assert_eq!(store.names(PropertyScope::Outbound), vec!["Foo".to_owned()]);
    }

    #[test]
    fn test_none_and_null_remove() {
        let mut store = ScopedPropertyStore::new();
        store.set("a", Some(1.into()), PropertyScope::Invocation, None);
        store.set("b", Some(2.into()), PropertyScope::Invocation, None);

        store.set("a", None, PropertyScope::Invocation, None);
        store.set(
            "b",
            Some(PropertyValue::Object(Payload::null())),
            PropertyScope::Invocation,
            None,
        );

        assert!(store.names(PropertyScope::Invocation).is_empty());
    }

    #[test]
    fn test_remove_any_prefers_outbound() {
        let mut store = ScopedPropertyStore::new();
        store.set("k", Some("out".into()), PropertyScope::Outbound, None);
        store.set("k", Some("inv".into()), PropertyScope::Invocation, None);

        assert_eq!(store.remove_any("k"), Some("out".into()));
        assert_eq!(store.remove_any("k"), Some("inv".into()));
        assert_eq!(store.remove_any("k"), None);
    }

    #[test]
    fn test_property_names_union() {
        let mut store = ScopedPropertyStore::new();
        store.add_inbound_properties([("Host", PropertyValue::from("a"))]);
        store.set("host", Some("b".into()), PropertyScope::Outbound, None);
        store.set("path", Some("/".into()), PropertyScope::Invocation, None);

        let names = store.property_names();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.eq_ignore_ascii_case("host")));
    }

    #[test]
    fn test_data_type_defaults_from_value() {
        let mut store = ScopedPropertyStore::new();
        store.set("n", Some(7.into()), PropertyScope::Outbound, None);
        let dt = store.data_type("n", PropertyScope::Outbound).unwrap();
        assert!(dt.type_ref().is::<i64>());
    }

    #[test]
    fn test_session_scope_is_not_stored() {
        let mut store = ScopedPropertyStore::new();
        store.set("s", Some(true.into()), PropertyScope::Session, None);
        assert!(store.get("s", PropertyScope::Session).is_none());
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(PropertyValue::from("42").as_i64(), Some(42));
        assert_eq!(PropertyValue::from("TRUE").as_bool(), Some(true));
        assert_eq!(PropertyValue::from(3).as_f64(), Some(3.0));
        assert_eq!(String::from_property(&PropertyValue::Int(5)), Some("5".to_owned()));
        assert_eq!(i32::from_property(&PropertyValue::Bool(true)), None);
    }
}
