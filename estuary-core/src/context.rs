//! # Runtime Context
//!
//! [`EsbContext`] is the explicit replacement for a process-wide runtime
//! singleton. Every message holds an `Arc<EsbContext>` and reads from it:
//!
//! - the [`Configuration`] (default encoding, timeouts, access control)
//! - the [`TransformerLookup`] used for on-demand payload conversion
//! - the [`DataTypeConversionResolver`] used by extended transformations
//! - the [`Notifier`] that receives exception notifications
//!
//! ```rust,ignore
//! let registry = Arc::new(TransformerRegistry::builder().with_standard_converters().build());
//! let context = EsbContext::builder()
//!     .configuration(Configuration::from_toml_str(doc)?)
//!     .transformers(registry)
//!     .build();
//! ```

use crate::config::Configuration;
use crate::data_type::DataType;
use crate::error::BoxError;
use crate::transformer::{DataTypeConversionResolver, NoTransformers, Transformer, TransformerLookup};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// An exception observed by an exception listener.
#[derive(Debug, Clone)]
pub struct ExceptionNotification {
    /// Display text of the error.
    pub description: String,
    /// Component that raised the error, when known.
    pub component: Option<String>,
    /// When the listener observed the error.
    pub raised_at: SystemTime,
}

/// Receives exception notifications.
///
/// Delivery is best effort: failures are logged by the caller and ignored.
pub trait Notifier: Send + Sync {
    /// Deliver a notification.
    fn notify(&self, notification: &ExceptionNotification) -> Result<(), BoxError>;
}

/// A notifier that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &ExceptionNotification) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Shared runtime services.
pub struct EsbContext {
    configuration: Configuration,
    transformers: Arc<dyn TransformerLookup>,
    resolver: Arc<dyn DataTypeConversionResolver>,
    notifier: Arc<dyn Notifier>,
}

impl EsbContext {
    /// Start building a context.
    pub fn builder() -> EsbContextBuilder {
        EsbContextBuilder::new()
    }

    /// A context with the given configuration and no transformers.
    pub fn new(configuration: Configuration) -> Arc<Self> {
        Self::builder().configuration(configuration).build()
    }

    /// The configuration.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Encoding used when a message declares none.
    pub fn default_encoding(&self) -> &str {
        &self.configuration.default_encoding
    }

    /// Event timeout when none is set.
    pub fn default_response_timeout(&self) -> Duration {
        self.configuration.default_response_timeout()
    }

    /// Whether events wait forever.
    pub fn is_disable_timeouts(&self) -> bool {
        self.configuration.disable_timeouts
    }

    /// Whether implicit conversions are attempted for unsupported transformers.
    pub fn use_extended_transformations(&self) -> bool {
        self.configuration.use_extended_transformations
    }

    /// Find a transformer from `source` to `target`.
    pub fn lookup_transformer(
        &self,
        source: &DataType,
        target: &DataType,
    ) -> Option<Arc<dyn Transformer>> {
        self.transformers.lookup_transformer(source, target)
    }

    /// The implicit conversion resolver.
    pub fn conversion_resolver(&self) -> &dyn DataTypeConversionResolver {
        self.resolver.as_ref()
    }

    /// The exception notifier.
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }
}

impl Default for EsbContext {
    fn default() -> Self {
        Self {
            configuration: Configuration::default(),
            transformers: Arc::new(NoTransformers),
            resolver: Arc::new(NoTransformers),
            notifier: Arc::new(NoopNotifier),
        }
    }
}

impl fmt::Debug for EsbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EsbContext")
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

/// Builder for [`EsbContext`].
#[derive(Default)]
pub struct EsbContextBuilder {
    context: EsbContext,
}

impl EsbContextBuilder {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.context.configuration = configuration;
        self
    }

    /// Use one registry for both lookup and implicit conversion.
    pub fn transformers<R>(mut self, registry: Arc<R>) -> Self
    where
        R: TransformerLookup + DataTypeConversionResolver + 'static,
    {
        self.context.transformers = registry.clone();
        self.context.resolver = registry;
        self
    }

    /// Override the implicit conversion resolver.
    pub fn conversion_resolver(mut self, resolver: Arc<dyn DataTypeConversionResolver>) -> Self {
        self.context.resolver = resolver;
        self
    }

    /// Set the exception notifier.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.context.notifier = notifier;
        self
    }

    /// Finish.
    pub fn build(self) -> Arc<EsbContext> {
        Arc::new(self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let context = EsbContext::new(Configuration::default());
        assert_eq!(context.default_encoding(), "UTF-8");
        assert!(!context.is_disable_timeouts());
        assert!(context
            .lookup_transformer(&DataType::string(), &DataType::bytes())
            .is_none());
    }
}
