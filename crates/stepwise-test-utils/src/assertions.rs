//! Assertion utilities for validating instance status.

use serde_json::Value;
use stepwise_core::{InstanceStatus, InstanceStatusView};
use thiserror::Error;

/// Error type for status validation failures
#[derive(Debug, Error)]
pub enum StatusAssertionError {
    #[error("Invalid status: expected {expected}, got {actual}")]
    InvalidStatus { expected: String, actual: String },

    #[error("Step outputs differ: expected {expected}, got {actual}")]
    StepOutputsMismatch { expected: String, actual: String },

    #[error("Output differs: expected {expected}, got {actual}")]
    OutputMismatch { expected: String, actual: String },

    #[error("Timed out after {waited_ms}ms: {last}")]
    Timeout { waited_ms: u64, last: String },

    #[error("Lookup failed: {0}")]
    Lookup(String),
}

/// Asserts that an instance has the expected status
pub fn assert_status(
    view: &InstanceStatusView,
    expected: InstanceStatus,
) -> Result<(), StatusAssertionError> {
    if view.status != expected {
        return Err(StatusAssertionError::InvalidStatus {
            expected: expected.to_string(),
            actual: view.status.to_string(),
        });
    }
    Ok(())
}

/// Asserts the full, ordered list of step outputs
pub fn assert_step_outputs(
    view: &InstanceStatusView,
    expected: &[Value],
) -> Result<(), StatusAssertionError> {
    let actual: Vec<&Value> = view.step_outputs.iter().map(|p| p.as_value()).collect();
    let matches =
        actual.len() == expected.len() && actual.iter().zip(expected).all(|(a, e)| *a == e);

    if !matches {
        return Err(StatusAssertionError::StepOutputsMismatch {
            expected: Value::Array(expected.to_vec()).to_string(),
            actual: Value::Array(actual.into_iter().cloned().collect()).to_string(),
        });
    }
    Ok(())
}

/// Asserts the final output; `None` means still unset
pub fn assert_output(
    view: &InstanceStatusView,
    expected: Option<Value>,
) -> Result<(), StatusAssertionError> {
    let actual = view.output.as_ref().map(|p| p.as_value().clone());
    if actual != expected {
        let render = |v: &Option<Value>| {
            v.as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unset".to_string())
        };
        return Err(StatusAssertionError::OutputMismatch {
            expected: render(&expected),
            actual: render(&actual),
        });
    }
    Ok(())
}
