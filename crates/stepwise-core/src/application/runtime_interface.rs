use crate::application::batch::{BatchOrchestrator, CreateRequest};
use crate::application::catalog::WorkflowCatalog;
use crate::application::correlator::{EventCorrelator, SendOutcome};
use crate::application::engine::StepExecutionEngine;
use crate::application::publish;
use crate::application::registry::InstanceRegistry;
use crate::domain::events::{DomainEventHandler, InstanceEvent, TracingEventHandler};
use crate::domain::instance::{
    InstanceId, InstanceStatusView, InstanceSummary, WorkflowInstance, WorkflowName,
};
use crate::domain::repository::DurableLog;
use crate::domain::workflow::WorkflowDefinition;
use crate::{CoreError, Payload};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Largest batch accepted by `create_batch`
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Reschedule running instances found in the log on `start`
    #[serde(default = "default_resume_on_start")]
    pub resume_on_start: bool,
}

fn default_max_batch_size() -> usize {
    100
}

fn default_resume_on_start() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            resume_on_start: default_resume_on_start(),
        }
    }
}

/// Response to a create call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedInstance {
    pub id: InstanceId,

    #[serde(flatten)]
    pub view: InstanceStatusView,

    /// False when an instance with this name already existed
    #[serde(skip)]
    pub created: bool,
}

/// The main API provided by Stepwise Core to external systems
#[derive(Clone)]
pub struct WorkflowRuntime {
    registry: Arc<InstanceRegistry>,
    correlator: Arc<EventCorrelator>,
    engine: StepExecutionEngine,
    batch: Arc<BatchOrchestrator>,
    catalog: WorkflowCatalog,
    handler: Arc<dyn DomainEventHandler>,
    resume_on_start: bool,
}

impl WorkflowRuntime {
    /// Wire a runtime over a durable log
    pub fn new(
        log: Arc<dyn DurableLog>,
        catalog: WorkflowCatalog,
        handler: Arc<dyn DomainEventHandler>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(InstanceRegistry::new(log));
        let correlator = Arc::new(EventCorrelator::new(registry.clone(), handler.clone()));
        let engine = StepExecutionEngine::new(
            registry.clone(),
            correlator.clone(),
            catalog.clone(),
            handler.clone(),
        );
        let batch = Arc::new(BatchOrchestrator::new(
            registry.clone(),
            catalog.clone(),
            engine.clone(),
            handler.clone(),
            config.max_batch_size,
        ));

        Self {
            registry,
            correlator,
            engine,
            batch,
            catalog,
            handler,
            resume_on_start: config.resume_on_start,
        }
    }

    /// Runtime with an empty catalog, the tracing handler and default config
    pub fn with_log(log: Arc<dyn DurableLog>) -> Self {
        Self::new(
            log,
            WorkflowCatalog::new(),
            Arc::new(TracingEventHandler),
            EngineConfig::default(),
        )
    }

    /// Registered workflow definitions
    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Register a workflow definition
    pub fn register(&self, definition: WorkflowDefinition) {
        self.catalog.register(definition);
    }

    /// Rebuild state from the log and resume running instances
    ///
    /// Returns the ids of the instances found running.
    pub async fn start(&self) -> Result<Vec<InstanceId>, CoreError> {
        let running = self.registry.rebuild().await?;
        if self.resume_on_start {
            for id in &running {
                self.engine.schedule(id.clone());
            }
            tracing::info!(resumed = running.len(), "Runtime started");
        } else {
            tracing::info!(
                running = running.len(),
                "Runtime started without resuming running instances"
            );
        }
        Ok(running)
    }

    /// Create an instance and start executing it in the background
    ///
    /// Returns as soon as the instance is durably allocated. Reusing a name
    /// returns the existing instance instead of creating a second one.
    pub async fn create(
        &self,
        workflow: &str,
        id: Option<&str>,
        params: Payload,
    ) -> Result<CreatedInstance, CoreError> {
        let workflow = WorkflowName::from(workflow);
        self.catalog.get(&workflow)?;
        let id = id.map(InstanceId::parse).transpose()?;

        let outcome = self.registry.create(id, workflow.clone(), params).await?;
        let instance_id = outcome.instance.id.clone();

        if outcome.created {
            publish(
                self.handler.as_ref(),
                InstanceEvent::Created {
                    instance_id: instance_id.clone(),
                    workflow,
                    timestamp: Utc::now(),
                },
            )
            .await;
        }
        self.engine.schedule(instance_id.clone());

        Ok(CreatedInstance {
            id: instance_id,
            view: outcome.instance.view(),
            created: outcome.created,
        })
    }

    /// Create several instances; ids come back in request order
    pub async fn create_batch(
        &self,
        workflow: &str,
        requests: Vec<CreateRequest>,
    ) -> Result<Vec<InstanceId>, CoreError> {
        self.batch
            .create_batch(&WorkflowName::from(workflow), requests)
            .await
    }

    /// Create `count` instances with generated ids
    pub async fn create_count(
        &self,
        workflow: &str,
        count: usize,
    ) -> Result<Vec<InstanceId>, CoreError> {
        self.batch
            .create_count(&WorkflowName::from(workflow), count)
            .await
    }

    /// Status of an instance
    pub async fn status(&self, id: &str) -> Result<InstanceStatusView, CoreError> {
        Ok(self.instance(id).await?.view())
    }

    /// Full materialized state of an instance
    pub async fn instance(&self, id: &str) -> Result<WorkflowInstance, CoreError> {
        // Names that fail validation can never have been created
        self.registry.get(&InstanceId(id.to_string())).await
    }

    /// Send an event to an instance
    pub async fn send_event(
        &self,
        id: &str,
        event_type: &str,
        payload: Payload,
    ) -> Result<SendOutcome, CoreError> {
        self.correlator
            .send(&InstanceId(id.to_string()), event_type, payload)
            .await
    }

    /// All known instances with their status
    pub async fn list_instances(&self) -> Result<Vec<InstanceSummary>, CoreError> {
        self.registry.list().await
    }

    /// Stop every driver and wipe all state
    pub async fn reset(&self) -> Result<(), CoreError> {
        self.engine.shutdown();
        self.registry.reset().await?;
        tracing::warn!("Runtime state reset");
        Ok(())
    }

    /// Stop every driver; the log is left as is
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::InstanceStatus;
    use crate::domain::repository::memory::MemoryDurableLog;
    use serde_json::json;
    use std::time::Duration;

    fn demo() -> WorkflowDefinition {
        WorkflowDefinition::builder("demo")
            .step_fn("first", |_ctx| async {
                Ok::<_, CoreError>(Payload::new(json!({"output": "First step result"})))
            })
            .step_fn("second", |_ctx| async {
                Ok::<_, CoreError>(Payload::new(json!({"output": "Second step result"})))
            })
            .output(crate::domain::workflow::FinalOutput::Param("/output".to_string()))
            .build()
            .unwrap()
    }

    async fn wait_terminal(runtime: &WorkflowRuntime, id: &str) -> InstanceStatusView {
        for _ in 0..200 {
            let view = runtime.status(id).await.unwrap();
            if view.status.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("instance {} never finished", id);
    }

    #[tokio::test]
    async fn test_create_then_complete() {
        let runtime = WorkflowRuntime::with_log(Arc::new(MemoryDurableLog::new()));
        runtime.register(demo());

        let created = runtime
            .create("demo", None, Payload::new(json!({"output": "done"})))
            .await
            .unwrap();
        assert!(created.created);
        assert_eq!(
            serde_json::to_value(&created).unwrap(),
            json!({
                "id": created.id.as_str(),
                "status": "running",
                "stepOutputs": [],
                "output": null
            })
        );

        let view = wait_terminal(&runtime, created.id.as_str()).await;
        assert_eq!(view.status, InstanceStatus::Complete);
        assert_eq!(view.output, Some(Payload::from("done")));
        assert_eq!(view.step_outputs.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_bad_name() {
        let runtime = WorkflowRuntime::with_log(Arc::new(MemoryDurableLog::new()));
        runtime.register(demo());

        let err = runtime.create("nope", None, Payload::null()).await.unwrap_err();
        assert_eq!(err.code(), "workflow.not_found");

        let err = runtime
            .create("demo", Some("bad name"), Payload::null())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "instance.invalid_id");

        let err = runtime.status("bad name").await.unwrap_err();
        assert_eq!(err.code(), "instance.not_found");
    }

    #[tokio::test]
    async fn test_restart_over_same_log_keeps_outputs() {
        let log = MemoryDurableLog::new();
        let first = WorkflowRuntime::with_log(Arc::new(log.clone()));
        first.register(demo());
        first
            .create("demo", Some("something"), Payload::null())
            .await
            .unwrap();
        let before = wait_terminal(&first, "something").await;
        first.shutdown();

        let second = WorkflowRuntime::with_log(Arc::new(log));
        second.register(demo());
        assert!(second.start().await.unwrap().is_empty());
        assert_eq!(second.status("something").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reset_forgets_instances() {
        let runtime = WorkflowRuntime::with_log(Arc::new(MemoryDurableLog::new()));
        runtime.register(demo());
        runtime.create("demo", Some("gone"), Payload::null()).await.unwrap();

        runtime.reset().await.unwrap();
        assert!(runtime.list_instances().await.unwrap().is_empty());
        assert!(runtime.status("gone").await.unwrap_err().is_not_found());
    }
}
