use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for the Stepwise runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No instance with this identifier was ever created
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// No workflow definition registered under this name
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Caller-supplied instance identifier is malformed
    #[error("Invalid instance id: {0}")]
    InvalidInstanceId(String),

    /// A step's computation failed and could not be recovered
    #[error("Step failed: {0}")]
    StepFailed(String),

    /// A record could not be made durable
    #[error("Log append failed: {0}")]
    LogAppendFailed(String),

    /// History read back from the log does not replay cleanly
    #[error("Corrupt history for instance {instance}: {reason}")]
    CorruptHistory {
        /// Instance whose history is corrupt
        instance: String,
        /// What went wrong during replay
        reason: String,
    },

    /// A record is not valid for the instance's current state
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state
        from: String,
        /// Attempted transition
        to: String,
    },

    /// Request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Stable, dotted error code exposed to callers
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InstanceNotFound(_) => "instance.not_found",
            CoreError::WorkflowNotFound(_) => "workflow.not_found",
            CoreError::InvalidInstanceId(_) => "instance.invalid_id",
            CoreError::StepFailed(_) => "step.failed",
            CoreError::LogAppendFailed(_) => "log.append_failed",
            CoreError::CorruptHistory { .. } => "log.corrupt",
            CoreError::InvalidStateTransition { .. } => "instance.invalid_transition",
            CoreError::ValidationError(_) => "request.invalid",
            CoreError::StateStoreError(_) => "state.store_error",
            CoreError::SerializationError(_) => "serialization.failed",
            CoreError::ConfigurationError(_) => "config.invalid",
            CoreError::Other(_) => "internal",
        }
    }

    /// Whether the error means the target instance does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::InstanceNotFound(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}

/// User-facing error object
///
/// `message` carries the stable error code so callers can tell "never existed"
/// apart from a broken transport without parsing prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error class, always `"Error"`
    pub name: String,

    /// Stable error code, e.g. `instance.not_found`
    pub message: String,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&CoreError> for ErrorPayload {
    fn from(err: &CoreError) -> Self {
        Self {
            name: "Error".to_string(),
            message: err.code().to_string(),
            detail: Some(err.to_string()),
        }
    }
}
