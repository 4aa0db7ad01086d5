//! Testing utilities for the Stepwise workflow runtime.
//!
//! Fixture workflows and step bodies, a mock durable log for failure
//! injection, a recording event handler, bounded status polling and status
//! assertions.

pub mod assertions;
pub mod fixtures;
pub mod handlers;
pub mod mocks;
pub mod wait;

/// Re-export commonly used types for convenience
pub use mockall;

pub use assertions::{assert_output, assert_status, assert_step_outputs, StatusAssertionError};
pub use fixtures::{event_workflow, two_step_workflow, CountingStep, FlakyStep};
pub use handlers::RecordingEventHandler;
pub use mocks::MockDurableLog;
pub use wait::{wait_for, wait_for_status, wait_for_terminal, DEFAULT_WAIT};
