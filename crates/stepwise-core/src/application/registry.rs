//! Instance registry
//!
//! Materialized view of every instance, backed by the durable log. The
//! in-memory map is only a cache: any entry can be dropped and rebuilt from
//! the log. All writes to one instance are serialized by a per-instance lock
//! and reach the log before they reach the cache.

use crate::domain::instance::{InstanceId, InstanceSummary, WorkflowInstance, WorkflowName};
use crate::domain::log::{LogEntry, LogRecord};
use crate::domain::repository::DurableLog;
use crate::{CoreError, Payload};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of a create call
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    /// The instance as of its `created` record; never carries progress
    pub instance: WorkflowInstance,

    /// False when the name was already taken and the existing instance was returned
    pub created: bool,
}

/// Owner of instance identity and materialized state
pub struct InstanceRegistry {
    log: Arc<dyn DurableLog>,
    instances: DashMap<InstanceId, WorkflowInstance>,
    write_locks: DashMap<InstanceId, Arc<Mutex<()>>>,
}

impl InstanceRegistry {
    pub fn new(log: Arc<dyn DurableLog>) -> Self {
        Self {
            log,
            instances: DashMap::with_capacity(64),
            write_locks: DashMap::with_capacity(64),
        }
    }

    fn lock_for(&self, id: &InstanceId) -> Arc<Mutex<()>> {
        self.write_locks.entry(id.clone()).or_default().clone()
    }

    /// Allocate an instance, or return the existing one if the name is taken
    pub async fn create(
        &self,
        id: Option<InstanceId>,
        workflow: WorkflowName,
        params: Payload,
    ) -> Result<CreateOutcome, CoreError> {
        let id = id.unwrap_or_else(InstanceId::generate);
        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        match self.get(&id).await {
            Ok(existing) => {
                tracing::debug!(instance_id = %id, "Instance already exists");
                return Ok(CreateOutcome {
                    instance: existing.as_created(),
                    created: false,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let record = LogRecord::created(workflow, params);
        let sequence = self
            .log
            .append(&id, &record)
            .await
            .map_err(|e| append_failed(&id, e))?;

        let instance = WorkflowInstance::from_history(&id, &[LogEntry { sequence, record }])?;
        self.instances.insert(id.clone(), instance.clone());

        tracing::info!(instance_id = %id, workflow = %instance.workflow, "Created instance");

        Ok(CreateOutcome {
            instance,
            created: true,
        })
    }

    /// Current state of an instance
    ///
    /// Falls back to replaying the log when the cache has no entry.
    pub async fn get(&self, id: &InstanceId) -> Result<WorkflowInstance, CoreError> {
        if let Some(instance) = self.instances.get(id) {
            return Ok(instance.clone());
        }

        let instance = self.load(id).await?;
        // A concurrent writer may have published a newer state meanwhile
        let cached = self
            .instances
            .entry(id.clone())
            .or_insert(instance)
            .clone();
        Ok(cached)
    }

    async fn load(&self, id: &InstanceId) -> Result<WorkflowInstance, CoreError> {
        let history = self.log.read_all(id).await?;
        WorkflowInstance::from_history(id, &history)
    }

    /// Validate, persist, then publish one record
    ///
    /// Nothing is published if the record is invalid for the current state or
    /// the append fails.
    pub async fn record(
        &self,
        id: &InstanceId,
        record: LogRecord,
    ) -> Result<WorkflowInstance, CoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut instance = self.get(id).await?;
        if let Err(e) = instance.apply(&record) {
            if instance.status.is_terminal() {
                self.write_locks.remove(id);
            }
            return Err(e);
        }

        self.log
            .append(id, &record)
            .await
            .map_err(|e| append_failed(id, e))?;

        self.instances.insert(id.clone(), instance.clone());
        if instance.status.is_terminal() {
            // Terminal instances accept no further records
            self.write_locks.remove(id);
        }
        tracing::trace!(instance_id = %id, kind = record.kind(), "Recorded");
        Ok(instance)
    }

    /// Drop the cache and replay every history from the log
    ///
    /// Returns the ids of instances that are still running. Instances whose
    /// history fails to replay are logged and skipped.
    pub async fn rebuild(&self) -> Result<Vec<InstanceId>, CoreError> {
        self.invalidate();

        let mut running = Vec::new();
        for summary in self.log.list_instances().await? {
            match self.load(&summary.id).await {
                Ok(instance) => {
                    if !instance.status.is_terminal() {
                        running.push(instance.id.clone());
                    }
                    self.instances.insert(summary.id, instance);
                }
                Err(e) => {
                    tracing::error!(
                        instance_id = %summary.id,
                        error = %e,
                        "Failed to replay instance history"
                    );
                }
            }
        }

        tracing::info!(
            instances = self.instances.len(),
            running = running.len(),
            "Rebuilt instance registry from log"
        );
        Ok(running)
    }

    /// Forget all cached state without touching the log
    pub fn invalidate(&self) {
        self.instances.clear();
    }

    /// Every known instance with its status
    pub async fn list(&self) -> Result<Vec<InstanceSummary>, CoreError> {
        self.log.list_instances().await
    }

    /// Wipe the log and the cache
    pub async fn reset(&self) -> Result<(), CoreError> {
        self.log.reset().await?;
        self.instances.clear();
        self.write_locks.clear();
        Ok(())
    }
}

fn append_failed(id: &InstanceId, err: CoreError) -> CoreError {
    match err {
        CoreError::LogAppendFailed(_) => err,
        other => CoreError::LogAppendFailed(format!("instance {}: {}", id, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::{InstanceStatus, StepId};
    use crate::domain::repository::memory::MemoryDurableLog;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Log {}

        #[async_trait]
        impl DurableLog for Log {
            async fn append(&self, id: &InstanceId, record: &LogRecord) -> Result<u64, CoreError>;
            async fn read_all(&self, id: &InstanceId) -> Result<Vec<LogEntry>, CoreError>;
            async fn list_instances(&self) -> Result<Vec<InstanceSummary>, CoreError>;
            async fn reset(&self) -> Result<(), CoreError>;
        }
    }

    fn registry() -> (InstanceRegistry, MemoryDurableLog) {
        let log = MemoryDurableLog::new();
        (InstanceRegistry::new(Arc::new(log.clone())), log)
    }

    #[tokio::test]
    async fn test_create_returns_fresh_snapshot() {
        let (registry, log) = registry();
        let outcome = registry
            .create(None, WorkflowName::from("demo"), Payload::null())
            .await
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.instance.status, InstanceStatus::Running);
        assert!(outcome.instance.step_outputs.is_empty());
        assert_eq!(outcome.instance.output, None);
        assert_eq!(log.len(&outcome.instance.id), 1);
    }

    #[tokio::test]
    async fn test_create_with_taken_name_returns_existing() {
        let (registry, log) = registry();
        let id = InstanceId::parse("something").unwrap();

        registry
            .create(Some(id.clone()), WorkflowName::from("demo"), Payload::null())
            .await
            .unwrap();
        registry
            .record(
                &id,
                LogRecord::step_completed(0, StepId::from("first"), Payload::from("one"), None),
            )
            .await
            .unwrap();

        let again = registry
            .create(Some(id.clone()), WorkflowName::from("demo"), Payload::null())
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.instance.status, InstanceStatus::Running);
        assert!(again.instance.step_outputs.is_empty());
        assert_eq!(log.len(&id), 2);

        // The stored instance keeps its progress
        assert_eq!(registry.get(&id).await.unwrap().step_outputs.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (registry, _) = registry();
        let err = registry
            .get(&InstanceId::parse("anotherTest").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "instance.not_found");
    }

    #[tokio::test]
    async fn test_invalidated_cache_self_heals_from_log() {
        let (registry, _) = registry();
        let id = InstanceId::parse("heal").unwrap();
        registry
            .create(Some(id.clone()), WorkflowName::from("demo"), Payload::null())
            .await
            .unwrap();
        registry
            .record(
                &id,
                LogRecord::step_completed(0, StepId::from("first"), Payload::from("one"), None),
            )
            .await
            .unwrap();
        let before = registry.get(&id).await.unwrap();

        registry.invalidate();
        let after = registry.get(&id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_rebuild_reports_running_instances() {
        let (registry, log) = registry();
        let running = InstanceId::parse("running").unwrap();
        let done = InstanceId::parse("done").unwrap();

        for id in [&running, &done] {
            registry
                .create(Some(id.clone()), WorkflowName::from("demo"), Payload::null())
                .await
                .unwrap();
        }
        registry
            .record(&done, LogRecord::completed(Payload::new(json!({}))))
            .await
            .unwrap();

        let fresh = InstanceRegistry::new(Arc::new(log));
        let still_running = fresh.rebuild().await.unwrap();
        assert_eq!(still_running, vec![running]);
        assert_eq!(
            fresh.get(&done).await.unwrap().status,
            InstanceStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_invalid_record_is_not_persisted() {
        let (registry, log) = registry();
        let id = InstanceId::parse("strict").unwrap();
        registry
            .create(Some(id.clone()), WorkflowName::from("demo"), Payload::null())
            .await
            .unwrap();
        registry
            .record(&id, LogRecord::completed(Payload::null()))
            .await
            .unwrap();

        let err = registry
            .record(&id, LogRecord::completed(Payload::from("twice")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "instance.invalid_transition");
        assert_eq!(log.len(&id), 2);
    }

    #[tokio::test]
    async fn test_write_lock_released_on_terminal_record() {
        let (registry, _log) = registry();
        let id = InstanceId::parse("finishing").unwrap();
        registry
            .create(Some(id.clone()), WorkflowName::from("demo"), Payload::null())
            .await
            .unwrap();

        registry
            .record(
                &id,
                LogRecord::step_completed(0, StepId::from("first"), Payload::from("one"), None),
            )
            .await
            .unwrap();
        assert!(registry.write_locks.contains_key(&id));

        registry
            .record(&id, LogRecord::completed(Payload::null()))
            .await
            .unwrap();
        assert!(!registry.write_locks.contains_key(&id));

        // A late writer still gets rejected without leaving a lock behind
        let err = registry
            .record(&id, LogRecord::completed(Payload::from("late")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "instance.invalid_transition");
        assert!(!registry.write_locks.contains_key(&id));
        assert_eq!(registry.get(&id).await.unwrap().status, InstanceStatus::Complete);
    }

    #[tokio::test]
    async fn test_append_failure_leaves_state_untouched() {
        let id = InstanceId::parse("flaky-disk").unwrap();
        let history = vec![LogEntry {
            sequence: 0,
            record: LogRecord::created(WorkflowName::from("demo"), Payload::null()),
        }];

        let mut log = MockLog::new();
        log.expect_read_all()
            .returning(move |_| Ok(history.clone()));
        log.expect_append()
            .returning(|_, _| Err(CoreError::StateStoreError("disk full".to_string())));

        let registry = InstanceRegistry::new(Arc::new(log));
        let err = registry
            .record(
                &id,
                LogRecord::step_completed(0, StepId::from("first"), Payload::from("one"), None),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "log.append_failed");
        let instance = registry.get(&id).await.unwrap();
        assert!(instance.step_outputs.is_empty());
        assert_eq!(instance.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_reset_wipes_everything() {
        let (registry, log) = registry();
        let outcome = registry
            .create(None, WorkflowName::from("demo"), Payload::null())
            .await
            .unwrap();

        registry.reset().await.unwrap();
        assert!(log.is_empty());
        assert!(registry.get(&outcome.instance.id).await.is_err());
        assert!(registry.list().await.unwrap().is_empty());
    }
}
