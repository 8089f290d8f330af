//! Error types for the Formguard service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Formguard operations.
#[derive(Error, Debug)]
pub enum FormguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rate limit call was made with arguments that can never be satisfied
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The shared counter store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormguardError {
    /// Whether this error means the shared store could not be used.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, FormguardError::Store(StoreError::Unavailable(_)))
    }
}

impl From<config::ConfigError> for FormguardError {
    fn from(err: config::ConfigError) -> Self {
        FormguardError::Config(err.to_string())
    }
}

/// Result type alias for Formguard operations.
pub type Result<T> = std::result::Result<T, FormguardError>;
