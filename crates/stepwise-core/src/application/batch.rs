use super::catalog::WorkflowCatalog;
use super::engine::StepExecutionEngine;
use super::publish;
use super::registry::InstanceRegistry;
use crate::domain::events::{DomainEventHandler, InstanceEvent};
use crate::domain::instance::{InstanceId, WorkflowName};
use crate::{CoreError, Payload};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

/// One instance to allocate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Caller-chosen name; generated when absent
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub params: Payload,
}

impl CreateRequest {
    pub fn named(id: impl Into<String>, params: Payload) -> Self {
        Self {
            id: Some(id.into()),
            params,
        }
    }
}

/// Creates groups of instances that then run independently
pub struct BatchOrchestrator {
    registry: Arc<InstanceRegistry>,
    catalog: WorkflowCatalog,
    engine: StepExecutionEngine,
    handler: Arc<dyn DomainEventHandler>,
    max_batch_size: usize,
}

impl BatchOrchestrator {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        catalog: WorkflowCatalog,
        engine: StepExecutionEngine,
        handler: Arc<dyn DomainEventHandler>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            registry,
            catalog,
            engine,
            handler,
            max_batch_size,
        }
    }

    /// Allocate every requested instance, then schedule them all
    ///
    /// The batch is validated as a whole before anything is written. Ids are
    /// returned in request order.
    pub async fn create_batch(
        &self,
        workflow: &WorkflowName,
        requests: Vec<CreateRequest>,
    ) -> Result<Vec<InstanceId>, CoreError> {
        self.catalog.get(workflow)?;
        self.check_size(requests.len())?;

        let mut seen = HashSet::new();
        let mut validated = Vec::with_capacity(requests.len());
        for request in requests {
            let id = request.id.as_deref().map(InstanceId::parse).transpose()?;
            if let Some(id) = &id {
                if !seen.insert(id.clone()) {
                    return Err(CoreError::ValidationError(format!(
                        "Duplicate instance id in batch: {}",
                        id
                    )));
                }
            }
            validated.push((id, request.params));
        }

        let mut ids = Vec::with_capacity(validated.len());
        for (id, params) in validated {
            match self.registry.create(id, workflow.clone(), params).await {
                Ok(outcome) => {
                    if outcome.created {
                        publish(
                            self.handler.as_ref(),
                            InstanceEvent::Created {
                                instance_id: outcome.instance.id.clone(),
                                workflow: workflow.clone(),
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                    }
                    ids.push(outcome.instance.id);
                }
                Err(e) => {
                    tracing::error!(
                        workflow = %workflow,
                        created = ids.len(),
                        error = %e,
                        "Batch creation failed part way; scheduling instances already created"
                    );
                    self.schedule_all(&ids);
                    return Err(e);
                }
            }
        }

        self.schedule_all(&ids);
        tracing::info!(workflow = %workflow, count = ids.len(), "Created batch");
        Ok(ids)
    }

    /// Allocate `count` instances with generated ids
    ///
    /// Member `n` (1-based) receives params `{"output": "n"}` so the
    /// members are distinguishable by their results.
    pub async fn create_count(
        &self,
        workflow: &WorkflowName,
        count: usize,
    ) -> Result<Vec<InstanceId>, CoreError> {
        self.check_size(count)?;
        let requests = (1..=count)
            .map(|position| CreateRequest {
                id: None,
                params: Payload::new(json!({ "output": position.to_string() })),
            })
            .collect();
        self.create_batch(workflow, requests).await
    }

    fn check_size(&self, len: usize) -> Result<(), CoreError> {
        if len > self.max_batch_size {
            return Err(CoreError::ValidationError(format!(
                "Batch of {} exceeds the maximum of {}",
                len, self.max_batch_size
            )));
        }
        Ok(())
    }

    fn schedule_all(&self, ids: &[InstanceId]) {
        for id in ids {
            self.engine.schedule(id.clone());
        }
    }
}
