//! Domain-specific error types following panic-free policy.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a [`HotReloadConfig`](crate::HotReloadConfig).
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// Config content is not valid TOML for the schema
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A field is present but out of range
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &str,
        value: impl ToString,
        expected: &str,
    ) -> Self {
        Self::InvalidFieldValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Error returned by a [`FunctionHandler`](crate::FunctionHandler) invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload did not have the shape the handler expects
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler ran but failed
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Creates a failure from any displayable error.
    pub fn failed<E: std::fmt::Display>(err: E) -> Self {
        Self::Failed(err.to_string())
    }
}
