//! Conversation state shared by every event of one exchange.

use crate::event::FlowConstruct;
use crate::property::{CaseInsensitiveMap, PropertyValue};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Authentication state of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    principal: Option<String>,
    authenticated: bool,
}

impl SecurityContext {
    /// An authenticated context for `principal`.
    pub fn authenticated(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            authenticated: true,
        }
    }

    /// The principal name.
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Whether authentication succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

struct SessionState {
    id: Uuid,
    properties: RwLock<CaseInsensitiveMap<PropertyValue>>,
    security_context: RwLock<Option<SecurityContext>>,
    flow_construct: RwLock<Option<Arc<FlowConstruct>>>,
    valid: AtomicBool,
}

/// A shared session handle. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionState>,
}

impl Session {
    /// A fresh, valid session with a new id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// A fresh session with the given id.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            inner: Arc::new(SessionState {
                id,
                properties: RwLock::new(CaseInsensitiveMap::new()),
                security_context: RwLock::new(None),
                flow_construct: RwLock::new(None),
                valid: AtomicBool::new(true),
            }),
        }
    }

    /// A fresh session owned by a flow.
    pub fn for_flow(flow_construct: Arc<FlowConstruct>) -> Self {
        let session = Self::new();
        session.set_flow_construct(Some(flow_construct));
        session
    }

    /// An independent session with the same id and a copy of the state.
    pub fn copy_of(source: &Session) -> Self {
        let copy = Self::with_id(source.id());
        *write(&copy.inner.properties) = read(&source.inner.properties).clone();
        *write(&copy.inner.security_context) = source.security_context();
        *write(&copy.inner.flow_construct) = source.flow_construct();
        copy.set_valid(source.is_valid());
        copy
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Whether both handles refer to the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Store a property. `None` or a null value removes it.
    pub fn set_property(&self, key: &str, value: Option<PropertyValue>) -> Option<PropertyValue> {
        let mut properties = write(&self.inner.properties);
        match value {
            Some(value) if !value.is_null() => properties.insert(key, value),
            _ => properties.remove(key),
        }
    }

    /// A copy of a property.
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        read(&self.inner.properties).get(key).cloned()
    }

    /// Remove a property.
    pub fn remove_property(&self, key: &str) -> Option<PropertyValue> {
        write(&self.inner.properties).remove(key)
    }

    /// Property names, sorted.
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.inner.properties)
            .keys()
            .map(str::to_owned)
            .collect();
        names.sort();
        names
    }

    /// Remove every property.
    pub fn clear_properties(&self) {
        write(&self.inner.properties).clear();
    }

    /// Copy every property of `other` into this session.
    pub fn merge(&self, other: &Session) {
        if self.ptr_eq(other) {
            return;
        }
        let incoming = read(&other.inner.properties).clone();
        let mut properties = write(&self.inner.properties);
        for (key, value) in incoming.iter() {
            properties.insert(key, value.clone());
        }
    }

    /// The security context.
    pub fn security_context(&self) -> Option<SecurityContext> {
        read(&self.inner.security_context).clone()
    }

    /// Replace the security context.
    pub fn set_security_context(&self, context: Option<SecurityContext>) {
        *write(&self.inner.security_context) = context;
    }

    /// The owning flow.
    pub fn flow_construct(&self) -> Option<Arc<FlowConstruct>> {
        read(&self.inner.flow_construct).clone()
    }

    /// Replace the owning flow.
    pub fn set_flow_construct(&self, flow_construct: Option<Arc<FlowConstruct>>) {
        *write(&self.inner.flow_construct) = flow_construct;
    }

    /// Whether the session is still usable.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Mark the session valid or invalid.
    pub fn set_valid(&self, valid: bool) {
        self.inner.valid.store(valid, Ordering::Release);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("valid", &self.is_valid())
            .field("properties", &self.property_names())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
