//! Runtime configuration.
//!
//! # Loading
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```rust,ignore
//! let config = Configuration::from_toml_str(r#"
//!     default_encoding = "ISO-8859-1"
//!
//!     [access_control]
//!     fail_on_message_scribbling = false
//! "#)?
//! .with_env_overrides()?;
//! ```
//!
//! # Environment overrides
//!
//! | variable | field |
//! |----------|-------|
//! | `ESTUARY_DEFAULT_ENCODING` | `default_encoding` |
//! | `ESTUARY_DISABLE_TIMEOUTS` | `disable_timeouts` |
//! | `ESTUARY_DISABLE_THREADSAFE_MESSAGES` | inverts `access_control.fail_on_message_scribbling` |
//! | `ESTUARY_USE_EXTENDED_TRANSFORMATIONS` | `use_extended_transformations` |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thread-ownership checks on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessControlConfig {
    /// Track the owner thread of every message.
    pub assert_message_access: bool,
    /// Fail a violating write instead of logging it.
    pub fail_on_message_scribbling: bool,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            assert_message_access: true,
            fail_on_message_scribbling: true,
        }
    }
}

/// Settings read by messages, events and the transformation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Encoding used when neither the data type nor the message declares one.
    pub default_encoding: String,
    /// Event timeout when none is set explicitly.
    pub default_response_timeout_ms: u64,
    /// Events wait forever.
    pub disable_timeouts: bool,
    /// Keep converted bytes of stream payloads.
    pub cache_message_as_bytes: bool,
    /// Record the payload a message was created with.
    pub cache_message_original_payload: bool,
    /// Resolve implicit conversions for unsupported transformers.
    pub use_extended_transformations: bool,
    /// Thread-ownership checks.
    pub access_control: AccessControlConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            default_encoding: "UTF-8".to_owned(),
            default_response_timeout_ms: 10_000,
            disable_timeouts: false,
            cache_message_as_bytes: true,
            cache_message_original_payload: true,
            use_extended_transformations: true,
            access_control: AccessControlConfig::default(),
        }
    }
}

impl Configuration {
    /// Parse a TOML document.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(document)?)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(encoding) = lookup("ESTUARY_DEFAULT_ENCODING") {
            self.default_encoding = encoding;
        }
        if let Some(value) = lookup("ESTUARY_DISABLE_TIMEOUTS") {
            self.disable_timeouts = parse_flag("ESTUARY_DISABLE_TIMEOUTS", value)?;
        }
        if let Some(value) = lookup("ESTUARY_DISABLE_THREADSAFE_MESSAGES") {
            self.access_control.fail_on_message_scribbling =
                !parse_flag("ESTUARY_DISABLE_THREADSAFE_MESSAGES", value)?;
        }
        if let Some(value) = lookup("ESTUARY_USE_EXTENDED_TRANSFORMATIONS") {
            self.use_extended_transformations =
                parse_flag("ESTUARY_USE_EXTENDED_TRANSFORMATIONS", value)?;
        }
        Ok(self)
    }

    /// [`Self::default_response_timeout_ms`] as a duration.
    pub fn default_response_timeout(&self) -> Duration {
        Duration::from_millis(self.default_response_timeout_ms)
    }
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidOverride { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Configuration::from_toml_str("").unwrap();
        assert_eq!(config, Configuration::default());
        assert_eq!(config.default_response_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_document() {
        let config = Configuration::from_toml_str(
            r#"
            default_encoding = "ISO-8859-1"
            disable_timeouts = true

            [access_control]
            fail_on_message_scribbling = false
            "#,
        )
        .unwrap();

        assert_eq!(config.default_encoding, "ISO-8859-1");
        assert!(config.disable_timeouts);
        assert!(config.access_control.assert_message_access);
        assert!(!config.access_control.fail_on_message_scribbling);
    }

    #[test]
    fn test_malformed_document() {
        let err = Configuration::from_toml_str("default_encoding = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ESTUARY_DEFAULT_ENCODING", "US-ASCII"),
            ("ESTUARY_DISABLE_THREADSAFE_MESSAGES", "true"),
            ("ESTUARY_USE_EXTENDED_TRANSFORMATIONS", "0"),
        ]
        .into_iter()
        .collect();

        let config = Configuration::default()
            .with_overrides_from(|k| vars.get(k).map(|v| (*v).to_owned()))
            .unwrap();

        assert_eq!(config.default_encoding, "US-ASCII");
        assert!(!config.access_control.fail_on_message_scribbling);
        assert!(!config.use_extended_transformations);
    }

    #[test]
    fn test_invalid_override() {
        let err = Configuration::default()
            .with_overrides_from(|k| (k == "ESTUARY_DISABLE_TIMEOUTS").then(|| "maybe".to_owned()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidOverride { var: "ESTUARY_DISABLE_TIMEOUTS", .. }
        ));
    }
}
