//! Standard message processors.

mod logging;
mod transformer;

pub use logging::LoggingProcessor;
pub use transformer::TransformerProcessor;
