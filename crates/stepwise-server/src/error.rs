//! Error types for the Stepwise server

use stepwise_core::CoreError;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request body or parameters
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// State store could not be opened
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Error raised by the workflow runtime
    #[error(transparent)]
    Runtime(CoreError),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConfigurationError(msg) => ServerError::ConfigError(msg),
            CoreError::StateStoreError(msg) => ServerError::StateStoreError(msg),
            other => ServerError::Runtime(other),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::ValidationError(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::InternalError(format!("IO error: {}", err))
    }
}

impl ServerError {
    /// Stable error code reported to clients
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::ValidationError(_) => "request.invalid",
            ServerError::ConfigError(_) => "config.invalid",
            ServerError::StateStoreError(_) => "state.store_error",
            ServerError::Runtime(err) => err.code(),
            ServerError::InternalError(_) => "internal",
        }
    }
}
