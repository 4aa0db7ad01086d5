use crate::{
    domain::log::{LogEntry, LogRecord},
    CoreError, Payload,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MAX_INSTANCE_ID_LEN: usize = 64;

/// Value object: Instance ID
///
/// Doubles as the caller-facing name of an instance. Generated ids are UUID v4
/// strings; caller-supplied ones go through [`InstanceId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Synthesize a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a caller-supplied name
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.is_empty() || raw.len() > MAX_INSTANCE_ID_LEN {
            return Err(CoreError::InvalidInstanceId(format!(
                "'{}' must be between 1 and {} characters",
                raw, MAX_INSTANCE_ID_LEN
            )));
        }

        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(CoreError::InvalidInstanceId(format!(
                "'{}' contains unsupported character '{}'",
                raw, bad
            )));
        }

        Ok(Self(raw.to_string()))
    }

    /// Borrow as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value object: Workflow name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowName(pub String);

impl WorkflowName {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Value object: Step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Instance lifecycle status
///
/// A suspended instance is still reported as `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Complete,
    Errored,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Complete => "complete",
            InstanceStatus::Errored => "errored",
        }
    }

    /// No further records are accepted once terminal
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "complete" => Ok(InstanceStatus::Complete),
            "errored" => Ok(InstanceStatus::Errored),
            other => Err(CoreError::SerializationError(format!(
                "unknown instance status '{}'",
                other
            ))),
        }
    }
}

/// A memoized step result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub step: StepId,
    pub output: Payload,
    pub completed_at: DateTime<Utc>,
}

/// An event held for an instance until a matching wait step consumes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedEvent {
    /// Identity used to mark the event consumed
    pub id: Uuid,

    /// Event name the wait step matches on
    pub event_type: String,

    /// Opaque event payload
    pub payload: Payload,

    /// When the event arrived
    pub received_at: DateTime<Utc>,
}

impl BufferedEvent {
    pub fn new(event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Failure recorded on an errored instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Error code, e.g. `step.failed`
    pub name: String,

    /// What happened
    pub message: String,
}

impl StepError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Unrecoverable step failure
    pub fn step_failed(message: impl Into<String>) -> Self {
        Self::new("step.failed", message)
    }

    /// Recorded history no longer lines up with the registered definition
    pub fn nondeterministic(message: impl Into<String>) -> Self {
        Self::new("workflow.nondeterministic", message)
    }
}

/// Aggregate: Workflow instance
///
/// Materialized state of one instance. Always derivable from its log history
/// via [`WorkflowInstance::from_history`]; every mutation goes through
/// [`WorkflowInstance::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow: WorkflowName,
    pub params: Payload,
    pub status: InstanceStatus,

    /// Append-only, in execution order
    pub step_outputs: Vec<StepResult>,

    /// Set exactly once, on the transition to `complete`
    pub output: Option<Payload>,

    pub error: Option<StepError>,

    /// Buffered events not yet consumed, oldest first
    pub pending_events: Vec<BufferedEvent>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Fresh running instance with no progress
    pub fn new(
        id: InstanceId,
        workflow: WorkflowName,
        params: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            workflow,
            params,
            status: InstanceStatus::Running,
            step_outputs: Vec::new(),
            output: None,
            error: None,
            pending_events: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    /// The instance as its `created` record left it, with no progress
    pub fn as_created(&self) -> Self {
        Self::new(
            self.id.clone(),
            self.workflow.clone(),
            self.params.clone(),
            self.created_at,
        )
    }

    /// Replay a full history into an instance
    ///
    /// An empty history means the instance never existed.
    pub fn from_history(id: &InstanceId, entries: &[LogEntry]) -> Result<Self, CoreError> {
        let mut entries = entries.iter();

        let first = entries
            .next()
            .ok_or_else(|| CoreError::InstanceNotFound(id.to_string()))?;

        let mut instance = match &first.record {
            LogRecord::Created {
                workflow,
                params,
                created_at,
            } => Self::new(id.clone(), workflow.clone(), params.clone(), *created_at),
            other => {
                return Err(CoreError::CorruptHistory {
                    instance: id.to_string(),
                    reason: format!("history starts with '{}' instead of 'created'", other.kind()),
                })
            }
        };

        for entry in entries {
            instance
                .apply(&entry.record)
                .map_err(|e| CoreError::CorruptHistory {
                    instance: id.to_string(),
                    reason: format!("record {}: {}", entry.sequence, e),
                })?;
        }

        Ok(instance)
    }

    /// Fold one record into the materialized state
    ///
    /// Rejects records that are not valid for the current state and leaves the
    /// instance untouched in that case.
    pub fn apply(&mut self, record: &LogRecord) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(self.invalid_transition(record));
        }

        match record {
            LogRecord::Created { .. } => return Err(self.invalid_transition(record)),

            LogRecord::StepCompleted {
                index,
                step,
                output,
                consumed_event,
                completed_at,
            } => {
                if *index != self.step_outputs.len() {
                    return Err(CoreError::InvalidStateTransition {
                        from: format!("step index {}", self.step_outputs.len()),
                        to: format!("step index {}", index),
                    });
                }

                if let Some(event_id) = consumed_event {
                    let position = self
                        .pending_events
                        .iter()
                        .position(|e| &e.id == event_id)
                        .ok_or_else(|| CoreError::InvalidStateTransition {
                            from: "pending events".to_string(),
                            to: format!("consume unknown event {}", event_id),
                        })?;
                    self.pending_events.remove(position);
                }

                self.step_outputs.push(StepResult {
                    index: *index,
                    step: step.clone(),
                    output: output.clone(),
                    completed_at: *completed_at,
                });
                self.updated_at = *completed_at;
            }

            LogRecord::EventBuffered { event } => {
                self.pending_events.push(event.clone());
                self.updated_at = event.received_at;
            }

            LogRecord::Completed {
                output,
                completed_at,
            } => {
                self.output = Some(output.clone());
                self.status = InstanceStatus::Complete;
                self.updated_at = *completed_at;
            }

            LogRecord::Errored { error, failed_at } => {
                self.error = Some(error.clone());
                self.status = InstanceStatus::Errored;
                self.updated_at = *failed_at;
            }
        }

        Ok(())
    }

    fn invalid_transition(&self, record: &LogRecord) -> CoreError {
        CoreError::InvalidStateTransition {
            from: self.status.to_string(),
            to: record.kind().to_string(),
        }
    }

    /// Index of the first step with no recorded result
    #[inline]
    pub fn next_step_index(&self) -> usize {
        self.step_outputs.len()
    }

    /// Oldest buffered event of the given type
    pub fn find_buffered(&self, event_type: &str) -> Option<&BufferedEvent> {
        self.pending_events
            .iter()
            .find(|e| e.event_type == event_type)
    }

    /// Caller-facing status shape
    pub fn view(&self) -> InstanceStatusView {
        InstanceStatusView {
            status: self.status,
            step_outputs: self
                .step_outputs
                .iter()
                .map(|r| r.output.clone())
                .collect(),
            output: self.output.clone(),
            error: self.error.clone(),
        }
    }
}

/// Status query response
///
/// `output` serializes as `null` until the instance completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatusView {
    pub status: InstanceStatus,
    pub step_outputs: Vec<Payload>,
    pub output: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

/// Entry returned when listing instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub status: InstanceStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn created(workflow: &str) -> LogEntry {
        LogEntry {
            sequence: 0,
            record: LogRecord::created(WorkflowName::from(workflow), Payload::null()),
        }
    }

    #[test]
    fn test_instance_id_validation() {
        assert!(InstanceId::parse("batch-1").is_ok());
        assert!(InstanceId::parse("something_else_42").is_ok());

        let err = InstanceId::parse("").unwrap_err();
        assert_eq!(err.code(), "instance.invalid_id");
        assert!(InstanceId::parse("has space").is_err());
        assert!(InstanceId::parse("slash/id").is_err());
        assert!(InstanceId::parse(&"x".repeat(65)).is_err());
        assert!(InstanceId::parse(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert_ne!(a, b);
        assert!(InstanceId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            InstanceStatus::Running,
            InstanceStatus::Complete,
            InstanceStatus::Errored,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert!("paused".parse::<InstanceStatus>().is_err());
        assert!(!InstanceStatus::Running.is_terminal());
        assert!(InstanceStatus::Complete.is_terminal());
    }

    #[test]
    fn test_replay_produces_outputs_in_order() {
        let id = InstanceId::parse("wf-1").unwrap();
        let history = vec![
            created("demo"),
            LogEntry {
                sequence: 1,
                record: LogRecord::step_completed(
                    0,
                    StepId::from("first"),
                    Payload::new(json!({"output": "First step result"})),
                    None,
                ),
            },
            LogEntry {
                sequence: 2,
                record: LogRecord::step_completed(
                    1,
                    StepId::from("second"),
                    Payload::new(json!({"output": "Second step result"})),
                    None,
                ),
            },
            LogEntry {
                sequence: 3,
                record: LogRecord::completed(Payload::from("done")),
            },
        ];

        let instance = WorkflowInstance::from_history(&id, &history).unwrap();
        assert_eq!(instance.status, InstanceStatus::Complete);
        assert_eq!(instance.next_step_index(), 2);

        let view = serde_json::to_value(instance.view()).unwrap();
        assert_eq!(
            view,
            json!({
                "status": "complete",
                "stepOutputs": [
                    {"output": "First step result"},
                    {"output": "Second step result"}
                ],
                "output": "done"
            })
        );
    }

    #[test]
    fn test_running_view_has_null_output() {
        let id = InstanceId::parse("wf-2").unwrap();
        let instance = WorkflowInstance::from_history(&id, &[created("demo")]).unwrap();
        let view = serde_json::to_value(instance.view()).unwrap();
        assert_eq!(
            view,
            json!({"status": "running", "stepOutputs": [], "output": null})
        );
    }

    #[test]
    fn test_created_snapshot_drops_progress() {
        let id = InstanceId::parse("wf-4").unwrap();
        let history = vec![
            created("demo"),
            LogEntry {
                sequence: 1,
                record: LogRecord::step_completed(
                    0,
                    StepId::from("first"),
                    Payload::from("one"),
                    None,
                ),
            },
            LogEntry {
                sequence: 2,
                record: LogRecord::completed(Payload::from("done")),
            },
        ];
        let instance = WorkflowInstance::from_history(&id, &history).unwrap();

        let snapshot = instance.as_created();
        assert_eq!(snapshot.id, instance.id);
        assert_eq!(snapshot.created_at, instance.created_at);
        assert_eq!(
            serde_json::to_value(snapshot.view()).unwrap(),
            json!({"status": "running", "stepOutputs": [], "output": null})
        );
    }

    #[test]
    fn test_empty_history_is_not_found() {
        let id = InstanceId::parse("ghost").unwrap();
        let err = WorkflowInstance::from_history(&id, &[]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_history_must_start_with_created() {
        let id = InstanceId::parse("wf-3").unwrap();
        let history = vec![LogEntry {
            sequence: 0,
            record: LogRecord::completed(Payload::null()),
        }];
        let err = WorkflowInstance::from_history(&id, &history).unwrap_err();
        assert_eq!(err.code(), "log.corrupt");
    }

    #[test]
    fn test_apply_rejects_out_of_order_step() {
        let id = InstanceId::parse("wf-4").unwrap();
        let mut instance = WorkflowInstance::from_history(&id, &[created("demo")]).unwrap();

        let skipped = LogRecord::step_completed(1, StepId::from("second"), Payload::null(), None);
        let err = instance.apply(&skipped).unwrap_err();
        assert_eq!(err.code(), "instance.invalid_transition");
        assert!(instance.step_outputs.is_empty());
    }

    #[test]
    fn test_apply_rejects_records_after_terminal() {
        let id = InstanceId::parse("wf-5").unwrap();
        let mut instance = WorkflowInstance::from_history(&id, &[created("demo")]).unwrap();
        instance.apply(&LogRecord::completed(Payload::null())).unwrap();

        let late = LogRecord::completed(Payload::from("again"));
        assert!(instance.apply(&late).is_err());
        assert_eq!(instance.output, Some(Payload::null()));
    }

    #[test]
    fn test_buffered_event_is_consumed_by_step() {
        let id = InstanceId::parse("wf-6").unwrap();
        let mut instance = WorkflowInstance::from_history(&id, &[created("demo-events")]).unwrap();

        let event = BufferedEvent::new("event", Payload::new(json!({"event": true})));
        let event_id = event.id;
        instance
            .apply(&LogRecord::EventBuffered { event })
            .unwrap();
        assert_eq!(instance.find_buffered("event").map(|e| e.id), Some(event_id));
        assert!(instance.find_buffered("other").is_none());

        instance
            .apply(&LogRecord::step_completed(
                0,
                StepId::from("wait"),
                Payload::new(json!({"event": true})),
                Some(event_id),
            ))
            .unwrap();
        assert!(instance.pending_events.is_empty());

        let unknown =
            LogRecord::step_completed(1, StepId::from("x"), Payload::null(), Some(event_id));
        assert!(instance.apply(&unknown).is_err());
    }
}
