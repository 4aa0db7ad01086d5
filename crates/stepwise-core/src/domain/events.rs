use crate::domain::instance::{InstanceId, StepId, WorkflowName};
use crate::CoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Lifecycle notifications published by the engine
///
/// These are observability signals only; the durable log remains the
/// source of truth.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceEvent {
    Created {
        instance_id: InstanceId,
        workflow: WorkflowName,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        instance_id: InstanceId,
        step: StepId,
        index: usize,
        timestamp: DateTime<Utc>,
    },
    /// Waiting for an external event
    Suspended {
        instance_id: InstanceId,
        step: StepId,
        event_type: String,
        timestamp: DateTime<Utc>,
    },
    /// A wait step received its event
    Resumed {
        instance_id: InstanceId,
        step: StepId,
        event_type: String,
        timestamp: DateTime<Utc>,
    },
    EventBuffered {
        instance_id: InstanceId,
        event_type: String,
        timestamp: DateTime<Utc>,
    },
    /// Event sent to a terminal instance
    EventDropped {
        instance_id: InstanceId,
        event_type: String,
        timestamp: DateTime<Utc>,
    },
    Completed {
        instance_id: InstanceId,
        timestamp: DateTime<Utc>,
    },
    Errored {
        instance_id: InstanceId,
        step: Option<StepId>,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl InstanceEvent {
    /// Dotted event name
    pub fn event_type(&self) -> &'static str {
        match self {
            InstanceEvent::Created { .. } => "instance.created",
            InstanceEvent::StepCompleted { .. } => "instance.step_completed",
            InstanceEvent::Suspended { .. } => "instance.suspended",
            InstanceEvent::Resumed { .. } => "instance.resumed",
            InstanceEvent::EventBuffered { .. } => "instance.event_buffered",
            InstanceEvent::EventDropped { .. } => "instance.event_dropped",
            InstanceEvent::Completed { .. } => "instance.completed",
            InstanceEvent::Errored { .. } => "instance.errored",
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        match self {
            InstanceEvent::Created { instance_id, .. }
            | InstanceEvent::StepCompleted { instance_id, .. }
            | InstanceEvent::Suspended { instance_id, .. }
            | InstanceEvent::Resumed { instance_id, .. }
            | InstanceEvent::EventBuffered { instance_id, .. }
            | InstanceEvent::EventDropped { instance_id, .. }
            | InstanceEvent::Completed { instance_id, .. }
            | InstanceEvent::Errored { instance_id, .. } => instance_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InstanceEvent::Created { timestamp, .. }
            | InstanceEvent::StepCompleted { timestamp, .. }
            | InstanceEvent::Suspended { timestamp, .. }
            | InstanceEvent::Resumed { timestamp, .. }
            | InstanceEvent::EventBuffered { timestamp, .. }
            | InstanceEvent::EventDropped { timestamp, .. }
            | InstanceEvent::Completed { timestamp, .. }
            | InstanceEvent::Errored { timestamp, .. } => *timestamp,
        }
    }
}

/// Receiver for instance lifecycle events
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: InstanceEvent) -> Result<(), CoreError>;
}

/// Default handler: writes every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: InstanceEvent) -> Result<(), CoreError> {
        match &event {
            InstanceEvent::Errored { step, message, .. } => tracing::warn!(
                event_type = event.event_type(),
                instance_id = %event.instance_id(),
                step = ?step,
                error = %message,
                "Instance errored"
            ),
            InstanceEvent::EventDropped { event_type, .. } => tracing::info!(
                event_type = event.event_type(),
                instance_id = %event.instance_id(),
                dropped = %event_type,
                "Dropped event for terminal instance"
            ),
            _ => tracing::debug!(
                event_type = event.event_type(),
                instance_id = %event.instance_id(),
                "Instance event"
            ),
        }
        Ok(())
    }
}
