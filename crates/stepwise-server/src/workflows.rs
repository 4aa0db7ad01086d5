//! Workflows served out of the box

use serde_json::json;
use stepwise_core::{CoreError, FinalOutput, Payload, WorkflowDefinition};

/// Two computation steps; final output is `params.output`
pub fn demo() -> Result<WorkflowDefinition, CoreError> {
    WorkflowDefinition::builder("demo")
        .step_fn("first", |_ctx| async {
            Ok::<_, CoreError>(Payload::new(json!({"output": "First step result"})))
        })
        .step_fn("second", |_ctx| async {
            Ok::<_, CoreError>(Payload::new(json!({"output": "Second step result"})))
        })
        .output(FinalOutput::Param("/output".to_string()))
        .build()
}

/// A step, a wait for an `event` event, then a step; final output `{}`
pub fn demo_events() -> Result<WorkflowDefinition, CoreError> {
    WorkflowDefinition::builder("demo-events")
        .step_fn("first", |_ctx| async {
            Ok::<_, CoreError>(Payload::new(json!({"output": "First step result"})))
        })
        .wait_for_event("wait", "event")
        .step_fn("second", |_ctx| async {
            Ok::<_, CoreError>(Payload::new(json!({"output": "Second step result"})))
        })
        .output(FinalOutput::Value(Payload::new(json!({}))))
        .build()
}

/// Every built-in workflow
pub fn builtin() -> Result<Vec<WorkflowDefinition>, CoreError> {
    Ok(vec![demo()?, demo_events()?])
}
