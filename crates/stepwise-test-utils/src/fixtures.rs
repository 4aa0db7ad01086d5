//! Fixture workflows and step bodies.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use stepwise_core::{
    CoreError, ExecutionResult, FinalOutput, Payload, StepContext, StepExecutor,
    WorkflowDefinition,
};

/// Step that returns a fixed output and counts how often it ran
#[derive(Clone)]
pub struct CountingStep {
    output: Payload,
    calls: Arc<AtomicU32>,
}

impl CountingStep {
    pub fn new(output: Payload) -> Self {
        Self {
            output,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Times the body has been executed, across clones
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for CountingStep {
    async fn execute(&self, _ctx: StepContext) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExecutionResult::Success(self.output.clone())
    }
}

/// Step that fails its first `failures` attempts, then succeeds
#[derive(Clone)]
pub struct FlakyStep {
    failures: u32,
    output: Payload,
    calls: Arc<AtomicU32>,
}

impl FlakyStep {
    pub fn new(failures: u32, output: Payload) -> Self {
        Self {
            failures,
            output,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A step that never succeeds
    pub fn always_failing() -> Self {
        Self::new(u32::MAX, Payload::null())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for FlakyStep {
    async fn execute(&self, ctx: StepContext) -> ExecutionResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            ExecutionResult::Failure(CoreError::StepFailed(format!(
                "{} attempt {} failed",
                ctx.step, ctx.attempt
            )))
        } else {
            ExecutionResult::Success(self.output.clone())
        }
    }
}

/// Two computation steps; final output is `params.output`
pub fn two_step_workflow(name: &str) -> WorkflowDefinition {
    WorkflowDefinition::builder(name)
        .step(
            "first",
            CountingStep::new(Payload::new(json!({"output": "First step result"}))),
        )
        .step(
            "second",
            CountingStep::new(Payload::new(json!({"output": "Second step result"}))),
        )
        .output(FinalOutput::Param("/output".to_string()))
        .build()
        .expect("fixture workflow is valid")
}

/// Step, wait for `event_type`, step; final output `{}`
pub fn event_workflow(name: &str, event_type: &str) -> WorkflowDefinition {
    WorkflowDefinition::builder(name)
        .step(
            "first",
            CountingStep::new(Payload::new(json!({"output": "First step result"}))),
        )
        .wait_for_event("wait", event_type)
        .step(
            "second",
            CountingStep::new(Payload::new(json!({"output": "Second step result"}))),
        )
        .output(FinalOutput::Value(Payload::new(json!({}))))
        .build()
        .expect("fixture workflow is valid")
}
