//! Durable log records
//!
//! Every mutation of an instance is expressed as one of these records. The
//! materialized [`WorkflowInstance`](super::instance::WorkflowInstance) is a
//! pure fold over them.

use crate::domain::instance::{BufferedEvent, InstanceStatus, StepError, StepId, WorkflowName};
use crate::{CoreError, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in an instance's append-only history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    /// Instance allocated
    Created {
        /// Definition the instance runs
        workflow: WorkflowName,
        /// Creation parameters
        params: Payload,
        /// Creation timestamp
        created_at: DateTime<Utc>,
    },

    /// A step produced its output (computation result or delivered event)
    StepCompleted {
        /// Position of the step in the definition
        index: usize,
        /// Step identifier
        step: StepId,
        /// Memoized output
        output: Payload,
        /// Buffered event consumed to produce this output, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consumed_event: Option<Uuid>,
        /// Completion timestamp
        completed_at: DateTime<Utc>,
    },

    /// An event arrived while no matching wait was posted
    EventBuffered {
        /// The buffered event
        event: BufferedEvent,
    },

    /// Instance finished and its final output was fixed
    Completed {
        /// Final output
        output: Payload,
        /// Completion timestamp
        completed_at: DateTime<Utc>,
    },

    /// Instance failed permanently
    Errored {
        /// Recorded failure
        error: StepError,
        /// Failure timestamp
        failed_at: DateTime<Utc>,
    },
}

impl LogRecord {
    /// Build a `created` record stamped now
    pub fn created(workflow: WorkflowName, params: Payload) -> Self {
        LogRecord::Created {
            workflow,
            params,
            created_at: Utc::now(),
        }
    }

    /// Build a `step_completed` record stamped now
    pub fn step_completed(
        index: usize,
        step: StepId,
        output: Payload,
        consumed_event: Option<Uuid>,
    ) -> Self {
        LogRecord::StepCompleted {
            index,
            step,
            output,
            consumed_event,
            completed_at: Utc::now(),
        }
    }

    /// Build a `completed` record stamped now
    pub fn completed(output: Payload) -> Self {
        LogRecord::Completed {
            output,
            completed_at: Utc::now(),
        }
    }

    /// Build an `errored` record stamped now
    pub fn errored(error: StepError) -> Self {
        LogRecord::Errored {
            error,
            failed_at: Utc::now(),
        }
    }

    /// Record kind as persisted in the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::Created { .. } => "created",
            LogRecord::StepCompleted { .. } => "step_completed",
            LogRecord::EventBuffered { .. } => "event_buffered",
            LogRecord::Completed { .. } => "completed",
            LogRecord::Errored { .. } => "errored",
        }
    }

    /// Status the instance is in after this record, when the record changes it
    pub fn status_after(&self) -> Option<InstanceStatus> {
        match self {
            LogRecord::Created { .. } => Some(InstanceStatus::Running),
            LogRecord::Completed { .. } => Some(InstanceStatus::Complete),
            LogRecord::Errored { .. } => Some(InstanceStatus::Errored),
            LogRecord::StepCompleted { .. } | LogRecord::EventBuffered { .. } => None,
        }
    }

    /// Encode for storage
    pub fn encode(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from storage
    pub fn decode(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A record together with its position in the instance history
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Zero-based, gap-free sequence number within the instance
    pub sequence: u64,

    /// The record itself
    pub record: LogRecord,
}
