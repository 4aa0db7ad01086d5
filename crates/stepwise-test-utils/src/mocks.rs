//! Mock durable log for failure injection.

use async_trait::async_trait;
use mockall::mock;
use stepwise_core::{CoreError, DurableLog, InstanceId, InstanceSummary, LogEntry, LogRecord};

mock! {
    pub DurableLog {}

    #[async_trait]
    impl DurableLog for DurableLog {
        async fn append(&self, id: &InstanceId, record: &LogRecord) -> Result<u64, CoreError>;
        async fn read_all(&self, id: &InstanceId) -> Result<Vec<LogEntry>, CoreError>;
        async fn list_instances(&self) -> Result<Vec<InstanceSummary>, CoreError>;
        async fn reset(&self) -> Result<(), CoreError>;
    }
}
