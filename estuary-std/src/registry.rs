//! Transformer registry.
//!
//! The registry answers both lookup questions the runtime asks:
//!
//! - [`TransformerLookup`]: which transformer turns `source` into `target`?
//! - [`DataTypeConversionResolver`]: which transformer turns `source` into
//!   any of these candidate types?
//!
//! Transformers whose return type matches the target exactly win over
//! transformers that merely return something compatible. Within each pass
//! registration order decides.

use crate::converters::standard_converters;
use estuary_core::{DataType, DataTypeConversionResolver, Transformer, TransformerLookup};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// An ordered collection of transformers.
pub struct TransformerRegistry {
    transformers: Vec<Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// Start building a registry.
    pub fn builder() -> TransformerRegistryBuilder {
        TransformerRegistryBuilder::new()
    }

    /// A registry holding the standard converters.
    pub fn standard() -> Self {
        Self::builder().with_standard_converters().build()
    }

    /// Registered transformers, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Transformer>> {
        self.transformers.iter()
    }

    /// Number of transformers.
    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// A transformer by name.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.iter().find(|t| t.name() == name).cloned()
    }
}

impl TransformerLookup for TransformerRegistry {
    fn lookup_transformer(
        &self,
        source: &DataType,
        target: &DataType,
    ) -> Option<Arc<dyn Transformer>> {
        let candidates = || {
            self.transformers
                .iter()
                .filter(|t| t.is_source_data_type_supported(source))
        };
        let found = candidates()
            .find(|t| t.return_data_type().type_ref() == target.type_ref() && target.is_compatible_with(t.return_data_type()))
            .or_else(|| candidates().find(|t| target.is_compatible_with(t.return_data_type())))
            .cloned();
        trace!(
            %source,
            %target,
            found = found.as_ref().map(|t| t.name()),
            "transformer lookup"
        );
        found
    }
}

impl DataTypeConversionResolver for TransformerRegistry {
    fn resolve(&self, source: &DataType, candidates: &[DataType]) -> Option<Arc<dyn Transformer>> {
        candidates
            .iter()
            .find_map(|target| self.lookup_transformer(source, target))
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.transformers.iter().map(|t| t.name()))
            .finish()
    }
}

/// Builder for [`TransformerRegistry`].
#[derive(Default)]
pub struct TransformerRegistryBuilder {
    transformers: Vec<Arc<dyn Transformer>>,
}

impl TransformerRegistryBuilder {
    /// Create a new empty registry builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transformer.
    pub fn register<T: Transformer>(mut self, transformer: T) -> Self {
        self.transformers.push(Arc::new(transformer));
        self
    }

    /// Register a shared transformer.
    pub fn register_arc(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    /// Register the standard converters.
    pub fn with_standard_converters(mut self) -> Self {
        self.transformers.extend(standard_converters());
        self
    }

    /// Build the registry.
    pub fn build(self) -> TransformerRegistry {
        TransformerRegistry {
            transformers: self.transformers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FnTransformer;
    use estuary_core::Payload;

    #[test]
    fn test_standard_lookup() {
        let registry = TransformerRegistry::standard();

        let found = registry
            .lookup_transformer(&DataType::of::<String>(), &DataType::bytes())
            .unwrap();
        assert_eq!(found.name(), "StringToBytes");

        let found = registry
            .lookup_transformer(&DataType::stream(), &DataType::of::<String>())
            .unwrap();
        assert_eq!(found.name(), "StreamToString");

        assert!(registry
            .lookup_transformer(&DataType::of::<u64>(), &DataType::bytes())
            .is_none());
    }

    #[test]
    fn test_registration_order_decides() {
        let custom = FnTransformer::builder("custom-encoder")
            .source(DataType::of::<String>())
            .returns(DataType::bytes())
            .build(|req| Ok(Payload::new(req.payload().as_str().unwrap_or_default().as_bytes().to_vec())));
        let registry = TransformerRegistry::builder()
            .register(custom)
            .with_standard_converters()
            .build();

        let found = registry
            .lookup_transformer(&DataType::of::<String>(), &DataType::bytes())
            .unwrap();
        assert_eq!(found.name(), "custom-encoder");
    }

    #[test]
    fn test_resolver_takes_first_candidate_with_a_match() {
        let registry = TransformerRegistry::standard();
        let candidates = [DataType::of::<u64>(), DataType::of::<String>(), DataType::bytes()];

        let found = registry
            .resolve(&DataType::stream(), &candidates)
            .unwrap();
        assert_eq!(found.name(), "StreamToString");
    }

    #[test]
    fn test_find_by_name() {
        let registry = TransformerRegistry::standard();
        assert_eq!(registry.len(), 4);
        assert!(registry.find_by_name("BytesToString").is_some());
        assert!(registry.find_by_name("nope").is_none());
    }
}
