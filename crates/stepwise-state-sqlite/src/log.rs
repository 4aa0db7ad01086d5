use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use stepwise_core::{
    CoreError, DurableLog, InstanceId, InstanceStatus, InstanceSummary, LogEntry, LogRecord,
};

use crate::SqliteConnection;

fn store_error(context: &'static str) -> impl Fn(sqlx::Error) -> CoreError {
    move |e| CoreError::StateStoreError(format!("{}: {}", context, e))
}

/// SQLite implementation of the durable log
#[derive(Clone)]
pub struct SqliteDurableLog {
    conn: SqliteConnection,
    // SQLite allows one writer; appends queue here instead of on SQLITE_BUSY
    write_lock: Arc<Mutex<()>>,
}

impl SqliteDurableLog {
    pub fn new(conn: SqliteConnection) -> Self {
        Self {
            conn,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn connection(&self) -> &SqliteConnection {
        &self.conn
    }
}

#[async_trait]
impl DurableLog for SqliteDurableLog {
    async fn append(&self, id: &InstanceId, record: &LogRecord) -> Result<u64, CoreError> {
        let encoded = record.encode()?;
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .conn
            .pool()
            .begin()
            .await
            .map_err(store_error("Failed to begin append"))?;

        let sequence: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence) + 1, 0) FROM instance_log WHERE instance_id = ?",
        )
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error("Failed to read next sequence"))?;

        sqlx::query(
            "INSERT INTO instance_log (instance_id, sequence, kind, record, recorded_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(sequence)
        .bind(record.kind())
        .bind(&encoded)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(store_error("Failed to append record"))?;

        match record.status_after() {
            Some(status) => {
                sqlx::query(
                    "INSERT INTO instances (instance_id, status, created_at, updated_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT (instance_id) DO UPDATE SET
                         status = excluded.status,
                         updated_at = excluded.updated_at",
                )
                .bind(id.as_str())
                .bind(status.as_str())
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(store_error("Failed to update instance status"))?;
            }
            None => {
                sqlx::query("UPDATE instances SET updated_at = ? WHERE instance_id = ?")
                    .bind(&now)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(store_error("Failed to touch instance"))?;
            }
        }

        tx.commit()
            .await
            .map_err(store_error("Failed to commit append"))?;

        debug!(instance_id = %id, sequence, kind = record.kind(), "Appended record");
        Ok(sequence as u64)
    }

    async fn read_all(&self, id: &InstanceId) -> Result<Vec<LogEntry>, CoreError> {
        let rows = sqlx::query(
            "SELECT sequence, record FROM instance_log WHERE instance_id = ? ORDER BY sequence",
        )
        .bind(id.as_str())
        .fetch_all(self.conn.pool())
        .await
        .map_err(store_error("Failed to read history"))?;

        rows.iter()
            .map(|row| -> Result<LogEntry, CoreError> {
                let sequence: i64 = row
                    .try_get("sequence")
                    .map_err(store_error("Failed to read sequence"))?;
                let raw: String = row
                    .try_get("record")
                    .map_err(store_error("Failed to read record"))?;
                let record = LogRecord::decode(&raw).map_err(|e| CoreError::CorruptHistory {
                    instance: id.to_string(),
                    reason: format!("record {} does not decode: {}", sequence, e),
                })?;
                Ok(LogEntry {
                    sequence: sequence as u64,
                    record,
                })
            })
            .collect()
    }

    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, CoreError> {
        let rows = sqlx::query("SELECT instance_id, status FROM instances ORDER BY instance_id")
            .fetch_all(self.conn.pool())
            .await
            .map_err(store_error("Failed to list instances"))?;

        rows.iter()
            .map(|row| -> Result<InstanceSummary, CoreError> {
                let id: String = row
                    .try_get("instance_id")
                    .map_err(store_error("Failed to read instance id"))?;
                let status: String = row
                    .try_get("status")
                    .map_err(store_error("Failed to read status"))?;
                Ok(InstanceSummary {
                    id: InstanceId(id),
                    status: status.parse::<InstanceStatus>()?,
                })
            })
            .collect()
    }

    async fn reset(&self) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .conn
            .pool()
            .begin()
            .await
            .map_err(store_error("Failed to begin reset"))?;

        sqlx::query("DELETE FROM instance_log")
            .execute(&mut *tx)
            .await
            .map_err(store_error("Failed to clear log"))?;
        sqlx::query("DELETE FROM instances")
            .execute(&mut *tx)
            .await
            .map_err(store_error("Failed to clear instances"))?;

        tx.commit()
            .await
            .map_err(store_error("Failed to commit reset"))?;

        tracing::warn!("SQLite durable log wiped");
        Ok(())
    }
}
