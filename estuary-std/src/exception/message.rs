//! Payload sent to error endpoints.

use estuary_core::Payload;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// What an error endpoint receives: the payload of the failed message,
/// the error, and where it happened.
#[derive(Clone)]
pub struct ExceptionMessage {
    payload: Payload,
    error: Arc<dyn Error + Send + Sync + 'static>,
    component_name: Option<String>,
    endpoint_uri: Option<String>,
    timestamp: SystemTime,
}

impl ExceptionMessage {
    /// Create an exception message stamped with the current time.
    pub fn new(
        payload: Payload,
        error: Arc<dyn Error + Send + Sync + 'static>,
        component_name: Option<String>,
        endpoint_uri: Option<String>,
    ) -> Self {
        Self {
            payload,
            error,
            component_name,
            endpoint_uri,
            timestamp: SystemTime::now(),
        }
    }

    /// Payload of the message that failed.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The error.
    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Component that failed, when known.
    pub fn component_name(&self) -> Option<&str> {
        self.component_name.as_deref()
    }

    /// Endpoint involved in the failure, when known.
    pub fn endpoint_uri(&self) -> Option<&str> {
        self.endpoint_uri.as_deref()
    }

    /// When the message was created.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

impl fmt::Debug for ExceptionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionMessage")
            .field("error", &self.error.to_string())
            .field("component_name", &self.component_name)
            .field("endpoint_uri", &self.endpoint_uri)
            .field("payload", &self.payload)
            .finish()
    }
}
