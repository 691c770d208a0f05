//! Configuration Error Types
//!
//! Specific, actionable error messages for configuration loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Configuration file not found at the expected location
    #[error("Config file not found: '{}'", path.display())]
    ConfigFileNotFound { path: PathBuf },

    /// File exists but cannot be read
    #[error("Config file '{file_path}' is not readable: {error}")]
    FileReadError { file_path: String, error: String },

    /// Syntax or shape error while deserializing
    #[error("Parse error for config file '{file_path}': {reason}")]
    ParseError { file_path: String, reason: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    #[error("Topology error: one exchange must be set as default")]
    MissingDefaultExchange,

    #[error("Topology error: only one exchange can be set as default, found {count}")]
    MultipleDefaultExchanges { count: usize },

    /// A job input schema that does not compile
    #[error("Invalid input schema for job '{job_name}': {reason}")]
    InvalidSchema { job_name: String, reason: String },

    #[error("Duplicate job definition: {job_name}")]
    DuplicateJob { job_name: String },
}

impl ConfigurationError {
    pub fn config_file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigFileNotFound { path: path.into() }
    }

    pub fn file_read_error<P: Into<String>, E: std::fmt::Display>(file_path: P, error: E) -> Self {
        Self::FileReadError {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    pub fn parse_error<P: Into<String>, E: std::fmt::Display>(file_path: P, reason: E) -> Self {
        Self::ParseError {
            file_path: file_path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn invalid_schema(job_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidSchema {
            job_name: job_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
