//! Error types for vulnkb-core
//!
//! Engine outcomes (`ExecuteError`, `BatchError`, `GuardError`) live next to the
//! components that produce them. This module holds the crate-level error used
//! by configuration loading and validation.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value failed validation
    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Configuration sources could not be read or deserialized
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Shorthand for an [`Error::InvalidConfig`]
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let error = Error::invalid_config("retry.jitter_factor", "must be within 0.0..=1.0");
        let msg = error.to_string();
        assert!(msg.contains("retry.jitter_factor"));
        assert!(msg.contains("0.0..=1.0"));
    }
}
