//!
//! Stepwise Core - durable workflow runtime
//!
//! Runs named, multi-step workflow instances whose progress lives in an
//! append-only durable log. Completed steps are memoized in the log and never
//! re-executed on resume; wait steps suspend an instance until a matching
//! event is sent to it.
//!
//! Backing stores implement [`DurableLog`]; the server crate wires a
//! [`WorkflowRuntime`] over one of them.

#![forbid(unsafe_code)]

/// Domain layer - instance model, log records, workflow definitions
pub mod domain;

/// Application services - registry, engine, correlation, batching
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

pub use error::{CoreError, ErrorPayload};
pub use types::Payload;

pub use application::batch::CreateRequest;
pub use application::catalog::WorkflowCatalog;
pub use application::correlator::SendOutcome;
pub use application::runtime_interface::{CreatedInstance, EngineConfig, WorkflowRuntime};

pub use domain::events::{DomainEventHandler, InstanceEvent, TracingEventHandler};
pub use domain::instance::{
    BufferedEvent, InstanceId, InstanceStatus, InstanceStatusView, InstanceSummary, StepError,
    StepId, StepResult, WorkflowInstance, WorkflowName,
};
pub use domain::log::{LogEntry, LogRecord};
pub use domain::repository::DurableLog;
pub use domain::workflow::{
    Backoff, ExecutionResult, FinalOutput, FnStep, RetryPolicy, StepContext, StepExecutor,
    WorkflowDefinition,
};

#[cfg(feature = "testing")]
pub use domain::repository::memory::MemoryDurableLog;
