use crate::domain::instance::{InstanceId, StepId, WorkflowInstance, WorkflowName};
use crate::{CoreError, Payload};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Result of a step computation
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Step produced its output
    Success(Payload),
    /// Step failed; may be retried according to its policy
    Failure(CoreError),
}

impl From<Result<Payload, CoreError>> for ExecutionResult {
    fn from(result: Result<Payload, CoreError>) -> Self {
        match result {
            Ok(output) => ExecutionResult::Success(output),
            Err(e) => ExecutionResult::Failure(e),
        }
    }
}

/// Everything a step body can see about the instance it runs in
#[derive(Debug, Clone)]
pub struct StepContext {
    pub instance_id: InstanceId,
    pub workflow: WorkflowName,
    pub params: Payload,
    pub step: StepId,
    pub index: usize,

    /// 1 on the first try, incremented per retry
    pub attempt: u32,

    /// Outputs of the steps before this one, in order
    pub previous: Vec<Payload>,
}

impl StepContext {
    /// Output of an earlier step by position
    pub fn output_of(&self, index: usize) -> Option<&Payload> {
        self.previous.get(index)
    }
}

/// A computation step body
///
/// Bodies may have side effects. The engine runs a body at most once per
/// recorded result, but a body interrupted by a crash before its result was
/// appended is run again on resume.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run the step
    async fn execute(&self, ctx: StepContext) -> ExecutionResult;
}

/// Adapter turning an async closure into a [`StepExecutor`]
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StepExecutor for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, CoreError>> + Send,
{
    async fn execute(&self, ctx: StepContext) -> ExecutionResult {
        (self.f)(ctx).await.into()
    }
}

/// How the delay between retry attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    #[default]
    Constant,
    Linear,
    Exponential,
}

/// Retry policy for a computation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub limit: u32,

    /// Base delay between attempts
    pub delay: Duration,

    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Fail on the first error
    pub fn none() -> Self {
        Self {
            limit: 0,
            delay: Duration::ZERO,
            backoff: Backoff::Constant,
        }
    }

    pub fn new(limit: u32, delay: Duration, backoff: Backoff) -> Self {
        Self {
            limit,
            delay,
            backoff,
        }
    }

    /// Delay before the retry that follows the given failed attempt (1-based)
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let attempt = failed_attempt.max(1);
        match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let exponent = (attempt - 1).min(16);
                self.delay.saturating_mul(1u32 << exponent)
            }
        }
    }
}

/// What a step does
#[derive(Clone)]
pub enum StepKind {
    /// Run a computation and record its output
    Compute {
        executor: Arc<dyn StepExecutor>,
        retries: RetryPolicy,
    },

    /// Suspend until an event of this type is delivered; its payload becomes
    /// the step output
    WaitForEvent {
        event_type: String,
        timeout: Option<Duration>,
    },
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Compute { retries, .. } => f
                .debug_struct("Compute")
                .field("retries", retries)
                .finish_non_exhaustive(),
            StepKind::WaitForEvent {
                event_type,
                timeout,
            } => f
                .debug_struct("WaitForEvent")
                .field("event_type", event_type)
                .field("timeout", timeout)
                .finish(),
        }
    }
}

/// A step in a workflow
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub id: StepId,
    pub kind: StepKind,
}

/// How the final output is derived once every step has a result
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FinalOutput {
    /// Output of the last step
    #[default]
    LastStep,
    /// Output of a named step
    Step(StepId),
    /// Value at a JSON pointer into the creation params
    Param(String),
    /// A fixed value
    Value(Payload),
}

/// A registered workflow: an ordered list of steps plus an output rule
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: WorkflowName,
    steps: Vec<StepDefinition>,
    output: FinalOutput,
}

impl WorkflowDefinition {
    /// Start building a definition
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            steps: Vec::new(),
            output: FinalOutput::LastStep,
        }
    }

    pub fn name(&self) -> &WorkflowName {
        &self.name
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn output(&self) -> &FinalOutput {
        &self.output
    }

    /// Check that recorded history lines up with this definition
    ///
    /// Returns a description of the first mismatch.
    pub fn check_history(&self, instance: &WorkflowInstance) -> Result<(), String> {
        if instance.step_outputs.len() > self.steps.len() {
            return Err(format!(
                "{} steps recorded but '{}' defines only {}",
                instance.step_outputs.len(),
                self.name,
                self.steps.len()
            ));
        }

        for (recorded, defined) in instance.step_outputs.iter().zip(&self.steps) {
            if recorded.step != defined.id {
                return Err(format!(
                    "step {} was recorded as '{}' but is now '{}'",
                    recorded.index, recorded.step, defined.id
                ));
            }
        }

        Ok(())
    }

    /// Compute the final output for an instance whose steps are all recorded
    pub fn resolve_output(&self, instance: &WorkflowInstance) -> Payload {
        match &self.output {
            FinalOutput::LastStep => instance
                .step_outputs
                .last()
                .map(|r| r.output.clone())
                .unwrap_or_default(),
            FinalOutput::Step(id) => instance
                .step_outputs
                .iter()
                .find(|r| &r.step == id)
                .map(|r| r.output.clone())
                .unwrap_or_default(),
            FinalOutput::Param(pointer) => instance
                .params
                .pointer(pointer)
                .cloned()
                .map(Payload::new)
                .unwrap_or_default(),
            FinalOutput::Value(value) => value.clone(),
        }
    }
}

/// Validating builder for [`WorkflowDefinition`]
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<StepDefinition>,
    output: FinalOutput,
}

impl WorkflowBuilder {
    /// Add a computation step that fails on the first error
    pub fn step(self, id: &str, executor: impl StepExecutor + 'static) -> Self {
        self.step_with_retry(id, executor, RetryPolicy::none())
    }

    /// Add a computation step with a retry policy
    pub fn step_with_retry(
        mut self,
        id: &str,
        executor: impl StepExecutor + 'static,
        retries: RetryPolicy,
    ) -> Self {
        self.steps.push(StepDefinition {
            id: StepId::from(id),
            kind: StepKind::Compute {
                executor: Arc::new(executor),
                retries,
            },
        });
        self
    }

    /// Add a computation step from an async closure
    pub fn step_fn<F, Fut>(self, id: &str, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, CoreError>> + Send + 'static,
    {
        self.step(id, FnStep::new(f))
    }

    /// Add a step that waits for an event with no deadline
    pub fn wait_for_event(mut self, id: &str, event_type: &str) -> Self {
        self.steps.push(StepDefinition {
            id: StepId::from(id),
            kind: StepKind::WaitForEvent {
                event_type: event_type.to_string(),
                timeout: None,
            },
        });
        self
    }

    /// Add a step that waits for an event and errors the instance on expiry
    pub fn wait_for_event_with_timeout(
        mut self,
        id: &str,
        event_type: &str,
        timeout: Duration,
    ) -> Self {
        self.steps.push(StepDefinition {
            id: StepId::from(id),
            kind: StepKind::WaitForEvent {
                event_type: event_type.to_string(),
                timeout: Some(timeout),
            },
        });
        self
    }

    pub fn output(mut self, output: FinalOutput) -> Self {
        self.output = output;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<WorkflowDefinition, CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Workflow name must not be empty".to_string(),
            ));
        }

        if self.steps.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "Workflow '{}' must have at least one step",
                self.name
            )));
        }

        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if step.id.as_str().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "Workflow '{}' has a step with an empty id",
                    self.name
                )));
            }
            if !step_ids.insert(step.id.as_str()) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate step ID: {}",
                    step.id
                )));
            }
            if let StepKind::WaitForEvent { event_type, .. } = &step.kind {
                if event_type.is_empty() {
                    return Err(CoreError::ValidationError(format!(
                        "Step {} waits for an event with an empty type",
                        step.id
                    )));
                }
            }
        }

        match &self.output {
            FinalOutput::Step(id) if !step_ids.contains(id.as_str()) => {
                return Err(CoreError::ValidationError(format!(
                    "Output references non-existent step: {}",
                    id
                )));
            }
            FinalOutput::Param(pointer) if !pointer.is_empty() && !pointer.starts_with('/') => {
                return Err(CoreError::ValidationError(format!(
                    "Output pointer '{}' must start with '/'",
                    pointer
                )));
            }
            _ => {}
        }

        Ok(WorkflowDefinition {
            name: WorkflowName(self.name),
            steps: self.steps,
            output: self.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::log::{LogEntry, LogRecord};
    use serde_json::json;

    fn constant(value: &'static str) -> impl StepExecutor {
        FnStep::new(move |_ctx: StepContext| {
            futures::future::ready(Ok::<_, CoreError>(Payload::from(value)))
        })
    }

    fn instance_with(outputs: &[(&str, Payload)], params: Payload) -> WorkflowInstance {
        let id = InstanceId::parse("wf").unwrap();
        let mut history = vec![LogEntry {
            sequence: 0,
            record: LogRecord::created(WorkflowName::from("demo"), params),
        }];
        for (i, (step, output)) in outputs.iter().enumerate() {
            history.push(LogEntry {
                sequence: i as u64 + 1,
                record: LogRecord::step_completed(i, StepId::from(*step), output.clone(), None),
            });
        }
        WorkflowInstance::from_history(&id, &history).unwrap()
    }

    #[test]
    fn test_builder_rejects_duplicate_steps() {
        let err = WorkflowDefinition::builder("dup")
            .step("a", constant("1"))
            .step("a", constant("2"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate step ID: a"));
    }

    #[test]
    fn test_builder_rejects_empty_and_dangling_output() {
        assert!(WorkflowDefinition::builder("").step("a", constant("1")).build().is_err());
        assert!(WorkflowDefinition::builder("none").build().is_err());

        let err = WorkflowDefinition::builder("dangling")
            .step("a", constant("1"))
            .output(FinalOutput::Step(StepId::from("missing")))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "request.invalid");

        assert!(WorkflowDefinition::builder("pointer")
            .step("a", constant("1"))
            .output(FinalOutput::Param("output".to_string()))
            .build()
            .is_err());
    }

    #[test]
    fn test_resolve_output_rules() {
        let params = Payload::new(json!({"output": "from params"}));
        let instance = instance_with(
            &[("first", Payload::from("one")), ("second", Payload::from("two"))],
            params,
        );

        let build = |output: FinalOutput| {
            WorkflowDefinition::builder("demo")
                .step("first", constant("one"))
                .step("second", constant("two"))
                .output(output)
                .build()
                .unwrap()
        };

        assert_eq!(build(FinalOutput::LastStep).resolve_output(&instance), Payload::from("two"));
        assert_eq!(
            build(FinalOutput::Step(StepId::from("first"))).resolve_output(&instance),
            Payload::from("one")
        );
        assert_eq!(
            build(FinalOutput::Param("/output".to_string())).resolve_output(&instance),
            Payload::from("from params")
        );
        assert_eq!(
            build(FinalOutput::Param("/absent".to_string())).resolve_output(&instance),
            Payload::null()
        );
        assert_eq!(
            build(FinalOutput::Value(Payload::new(json!({})))).resolve_output(&instance),
            Payload::new(json!({}))
        );
    }

    #[test]
    fn test_check_history_detects_renamed_step() {
        let definition = WorkflowDefinition::builder("demo")
            .step("first", constant("one"))
            .step("second", constant("two"))
            .build()
            .unwrap();

        let matching = instance_with(&[("first", Payload::null())], Payload::null());
        assert!(definition.check_history(&matching).is_ok());

        let renamed = instance_with(&[("other", Payload::null())], Payload::null());
        let reason = definition.check_history(&renamed).unwrap_err();
        assert!(reason.contains("'other'"));
    }

    #[test]
    fn test_retry_delays() {
        let base = Duration::from_millis(10);
        assert_eq!(RetryPolicy::new(3, base, Backoff::Constant).delay_for(3), base);
        assert_eq!(
            RetryPolicy::new(3, base, Backoff::Linear).delay_for(3),
            Duration::from_millis(30)
        );
        let exponential = RetryPolicy::new(5, base, Backoff::Exponential);
        assert_eq!(exponential.delay_for(1), Duration::from_millis(10));
        assert_eq!(exponential.delay_for(4), Duration::from_millis(80));
        assert_eq!(RetryPolicy::default().limit, 0);
    }

    #[tokio::test]
    async fn test_fn_step_maps_results() {
        let ok = FnStep::new(|ctx: StepContext| async move {
            Ok::<_, CoreError>(Payload::new(json!({"attempt": ctx.attempt})))
        });
        let ctx = StepContext {
            instance_id: InstanceId::parse("wf").unwrap(),
            workflow: WorkflowName::from("demo"),
            params: Payload::null(),
            step: StepId::from("a"),
            index: 0,
            attempt: 2,
            previous: vec![],
        };
        assert_eq!(
            ok.execute(ctx.clone()).await,
            ExecutionResult::Success(Payload::new(json!({"attempt": 2})))
        );

        let failing =
            FnStep::new(|_ctx: StepContext| async { Err::<Payload, _>(CoreError::from("boom")) });
        assert!(matches!(failing.execute(ctx).await, ExecutionResult::Failure(_)));
    }
}
