//! Step execution engine
//!
//! One driver task per running instance. A driver replays nothing: it starts
//! from the first step without a recorded result, runs steps in order and
//! appends each result before moving on.

use super::catalog::WorkflowCatalog;
use super::correlator::{EventCorrelator, WaitRegistration};
use super::publish;
use super::registry::InstanceRegistry;
use crate::domain::events::{DomainEventHandler, InstanceEvent};
use crate::domain::instance::{InstanceId, StepError, StepId, WorkflowInstance};
use crate::domain::log::LogRecord;
use crate::domain::workflow::{
    ExecutionResult, RetryPolicy, StepContext, StepDefinition, StepExecutor, StepKind,
};
use crate::CoreError;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Drives instances through their steps
#[derive(Clone)]
pub struct StepExecutionEngine {
    registry: Arc<InstanceRegistry>,
    correlator: Arc<EventCorrelator>,
    catalog: WorkflowCatalog,
    handler: Arc<dyn DomainEventHandler>,
    tasks: Arc<DashMap<InstanceId, JoinHandle<()>>>,
}

impl StepExecutionEngine {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        correlator: Arc<EventCorrelator>,
        catalog: WorkflowCatalog,
        handler: Arc<dyn DomainEventHandler>,
    ) -> Self {
        Self {
            registry,
            correlator,
            catalog,
            handler,
            tasks: Arc::new(DashMap::with_capacity(64)),
        }
    }

    /// Make sure a driver task is running for the instance
    ///
    /// Scheduling an instance whose driver is still alive is a no-op.
    pub fn schedule(&self, id: InstanceId) {
        let engine = self.clone();
        match self.tasks.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_finished() {
                    tracing::trace!(instance_id = %id, "Driver already running");
                    return;
                }
                entry.insert(tokio::spawn(engine.drive(id)));
            }
            Entry::Vacant(entry) => {
                entry.insert(tokio::spawn(engine.drive(id)));
            }
        }
    }

    async fn drive(self, id: InstanceId) {
        if let Err(e) = self.run(&id).await {
            tracing::error!(instance_id = %id, error = %e, "Instance driver stopped");
        }
    }

    /// Number of drivers still alive
    pub fn active(&self) -> usize {
        self.tasks.retain(|_, handle| !handle.is_finished());
        self.tasks.len()
    }

    /// Abort every driver task
    ///
    /// Suspended waits are dropped with them; nothing is written to the log.
    pub fn shutdown(&self) {
        let count = self.tasks.len();
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
        self.correlator.clear();
        tracing::info!(drivers = count, "Engine shut down");
    }

    /// Run an instance until it completes, errors or suspends forever
    pub async fn run(&self, id: &InstanceId) -> Result<(), CoreError> {
        let mut instance = self.registry.get(id).await?;
        if instance.status.is_terminal() {
            self.correlator.forget(id);
            return Ok(());
        }

        let definition = match self.catalog.get(&instance.workflow) {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!(
                    instance_id = %id,
                    workflow = %instance.workflow,
                    error = %e,
                    "Workflow not registered; leaving instance running"
                );
                return Ok(());
            }
        };

        if let Err(reason) = definition.check_history(&instance) {
            self.fail(id, None, StepError::nondeterministic(reason)).await?;
            return Ok(());
        }

        if instance.next_step_index() > 0 {
            tracing::info!(
                instance_id = %id,
                resume_at = instance.next_step_index(),
                "Resuming instance from recorded history"
            );
        }

        while let Some(step) = definition.step(instance.next_step_index()) {
            let index = instance.next_step_index();
            let advanced = match &step.kind {
                StepKind::Compute { executor, retries } => {
                    self.run_compute(&instance, index, step, executor.as_ref(), *retries)
                        .await?
                }
                StepKind::WaitForEvent {
                    event_type,
                    timeout,
                } => self.run_wait(id, index, step, event_type, *timeout).await?,
            };

            match advanced {
                Some(updated) => {
                    publish(
                        self.handler.as_ref(),
                        InstanceEvent::StepCompleted {
                            instance_id: id.clone(),
                            step: step.id.clone(),
                            index,
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
                    instance = updated;
                }
                None => return Ok(()),
            }
        }

        let output = definition.resolve_output(&instance);
        self.registry.record(id, LogRecord::completed(output)).await?;
        self.correlator.forget(id);

        tracing::info!(instance_id = %id, workflow = %instance.workflow, "Instance complete");
        publish(
            self.handler.as_ref(),
            InstanceEvent::Completed {
                instance_id: id.clone(),
                timestamp: Utc::now(),
            },
        )
        .await;

        Ok(())
    }

    /// Returns the updated instance, or `None` once the instance has errored
    async fn run_compute(
        &self,
        instance: &WorkflowInstance,
        index: usize,
        step: &StepDefinition,
        executor: &dyn StepExecutor,
        retries: RetryPolicy,
    ) -> Result<Option<WorkflowInstance>, CoreError> {
        let id = &instance.id;
        let previous: Vec<_> = instance
            .step_outputs
            .iter()
            .map(|r| r.output.clone())
            .collect();

        let mut attempt = 1;
        loop {
            let ctx = StepContext {
                instance_id: id.clone(),
                workflow: instance.workflow.clone(),
                params: instance.params.clone(),
                step: step.id.clone(),
                index,
                attempt,
                previous: previous.clone(),
            };

            tracing::debug!(instance_id = %id, step = %step.id, attempt, "Executing step");
            let result = AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await;

            let failure = match result {
                Ok(ExecutionResult::Success(output)) => {
                    let record = LogRecord::step_completed(index, step.id.clone(), output, None);
                    let updated = self.registry.record(id, record).await?;
                    tracing::debug!(instance_id = %id, step = %step.id, "Step completed");
                    return Ok(Some(updated));
                }
                Ok(ExecutionResult::Failure(e)) => e.to_string(),
                Err(panic) => format!("step panicked: {}", panic_message(panic.as_ref())),
            };

            if attempt > retries.limit {
                tracing::warn!(
                    instance_id = %id,
                    step = %step.id,
                    attempts = attempt,
                    error = %failure,
                    "Step failed permanently"
                );
                self.fail(id, Some(step.id.clone()), StepError::step_failed(failure))
                    .await?;
                return Ok(None);
            }

            let delay = retries.delay_for(attempt);
            tracing::warn!(
                instance_id = %id,
                step = %step.id,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %failure,
                "Step attempt failed; retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn run_wait(
        &self,
        id: &InstanceId,
        index: usize,
        step: &StepDefinition,
        event_type: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<WorkflowInstance>, CoreError> {
        let mut rx = match self
            .correlator
            .register_wait(id, index, &step.id, event_type)
            .await?
        {
            WaitRegistration::Ready(_) => return self.registry.get(id).await.map(Some),
            WaitRegistration::Pending(rx) => rx,
        };

        let received = match timeout {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.correlator.cancel_wait(id, index).await {
                        let message = format!(
                            "timed out after {}ms waiting for event '{}'",
                            limit.as_millis(),
                            event_type
                        );
                        self.fail(id, Some(step.id.clone()), StepError::step_failed(message))
                            .await?;
                        return Ok(None);
                    }
                    // A delivery won the race against the deadline
                    rx.await
                }
            },
        };

        match received {
            Ok(_) => self.registry.get(id).await.map(Some),
            Err(_) => Err(CoreError::Other(format!(
                "wait for event '{}' on step {} was abandoned",
                event_type, step.id
            ))),
        }
    }

    async fn fail(
        &self,
        id: &InstanceId,
        step: Option<StepId>,
        error: StepError,
    ) -> Result<(), CoreError> {
        let message = error.message.clone();
        self.registry.record(id, LogRecord::errored(error)).await?;
        self.correlator.forget(id);
        publish(
            self.handler.as_ref(),
            InstanceEvent::Errored {
                instance_id: id.clone(),
                step,
                message,
                timestamp: Utc::now(),
            },
        )
        .await;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
