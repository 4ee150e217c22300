//! Configuration Error Types
//!
//! Specific, actionable error messages for configuration loading and validation.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configuration sources could not be read or merged
    #[error("Failed to load configuration: {error}")]
    LoadError { error: String },

    /// Failed to read a configuration file
    #[error("Failed to read configuration file '{file_path}': {error}")]
    FileReadError { file_path: String, error: String },

    /// Merged configuration could not be deserialized
    #[error("Parse Error for configuration: {reason}")]
    ParseError { reason: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn load_error(error: impl std::fmt::Display) -> Self {
        Self::LoadError {
            error: error.to_string(),
        }
    }

    pub fn file_read_error(file_path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    pub fn parse_error(reason: impl std::fmt::Display) -> Self {
        Self::ParseError {
            reason: reason.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::FileParse { uri, cause } => Self::file_read_error(
                uri.unwrap_or_else(|| "<unknown>".to_string()),
                cause,
            ),
            config::ConfigError::Type { .. } => Self::parse_error(err),
            other => Self::load_error(other),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
