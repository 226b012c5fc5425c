//! Failure information attached to a message.

use crate::error::BoxError;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Describes the failure that interrupted processing of a message.
#[derive(Clone)]
pub struct ExceptionPayload {
    code: i32,
    message: String,
    error: Arc<dyn Error + Send + Sync + 'static>,
    info: BTreeMap<String, String>,
}

impl ExceptionPayload {
    /// Wrap an owned error.
    pub fn new(error: BoxError) -> Self {
        Self::from_shared(Arc::from(error))
    }

    /// Wrap a shared error.
    pub fn from_shared(error: Arc<dyn Error + Send + Sync + 'static>) -> Self {
        Self {
            code: -1,
            message: error.to_string(),
            error,
            info: BTreeMap::new(),
        }
    }

    /// Set the error code.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    /// Add a diagnostic entry.
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// Error code, `-1` when unset.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Message of the outermost error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error as raised.
    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Shared handle to the error.
    pub fn shared_error(&self) -> Arc<dyn Error + Send + Sync + 'static> {
        Arc::clone(&self.error)
    }

    /// Innermost error in the source chain.
    pub fn root_cause(&self) -> &(dyn Error + 'static) {
        let mut current: &(dyn Error + 'static) = self.error.as_ref();
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// Diagnostic entries.
    pub fn info(&self) -> &BTreeMap<String, String> {
        &self.info
    }
}

impl fmt::Debug for ExceptionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionPayload")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("root_cause", &self.root_cause().to_string())
            .field("info", &self.info)
            .finish()
    }
}
