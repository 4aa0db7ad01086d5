//! Durable log contract
//!
//! The log is the single source of truth for every instance. Backing stores
//! implement [`DurableLog`]; the in-memory fake lives in [`memory`].

use async_trait::async_trait;

use super::instance::{InstanceId, InstanceSummary};
use super::log::{LogEntry, LogRecord};
use crate::CoreError;

/// Append-only, per-instance history store
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Durably persist a record and return its sequence number
    ///
    /// Must not return before the record survives a process crash.
    async fn append(&self, id: &InstanceId, record: &LogRecord) -> Result<u64, CoreError>;

    /// Full ordered history of an instance; empty if it never existed
    async fn read_all(&self, id: &InstanceId) -> Result<Vec<LogEntry>, CoreError>;

    /// Every known instance with its latest status
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, CoreError>;

    /// Wipe all history
    async fn reset(&self) -> Result<(), CoreError>;
}

#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use crate::domain::instance::InstanceStatus;
    use dashmap::DashMap;
    use std::sync::Arc;

    /// In-memory durable log
    ///
    /// Clones share the same storage, so a test can drop a runtime and build a
    /// new one over the same history to simulate a restart.
    #[derive(Clone, Default)]
    pub struct MemoryDurableLog {
        histories: Arc<DashMap<InstanceId, Vec<LogRecord>>>,
    }

    impl MemoryDurableLog {
        /// Create an empty log
        pub fn new() -> Self {
            Self {
                histories: Arc::new(DashMap::with_capacity(64)),
            }
        }

        /// Number of records held for an instance
        pub fn len(&self, id: &InstanceId) -> usize {
            self.histories.get(id).map(|h| h.len()).unwrap_or(0)
        }

        /// Whether the log holds no instances at all
        pub fn is_empty(&self) -> bool {
            self.histories.is_empty()
        }
    }

    #[async_trait]
    impl DurableLog for MemoryDurableLog {
        async fn append(&self, id: &InstanceId, record: &LogRecord) -> Result<u64, CoreError> {
            let mut history = self.histories.entry(id.clone()).or_default();
            history.push(record.clone());
            Ok((history.len() - 1) as u64)
        }

        async fn read_all(&self, id: &InstanceId) -> Result<Vec<LogEntry>, CoreError> {
            Ok(self
                .histories
                .get(id)
                .map(|history| {
                    history
                        .iter()
                        .enumerate()
                        .map(|(sequence, record)| LogEntry {
                            sequence: sequence as u64,
                            record: record.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn list_instances(&self) -> Result<Vec<InstanceSummary>, CoreError> {
            let mut summaries: Vec<InstanceSummary> = self
                .histories
                .iter()
                .map(|entry| {
                    let status = entry
                        .value()
                        .iter()
                        .filter_map(LogRecord::status_after)
                        .last()
                        .unwrap_or(InstanceStatus::Running);
                    InstanceSummary {
                        id: entry.key().clone(),
                        status,
                    }
                })
                .collect();
            summaries.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(summaries)
        }

        async fn reset(&self) -> Result<(), CoreError> {
            self.histories.clear();
            Ok(())
        }
    }

}
