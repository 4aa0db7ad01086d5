//! SQLite durable log for the Stepwise workflow runtime
//!
//! This crate provides a crash-safe implementation of the `DurableLog`
//! interface defined in stepwise-core. Every append is its own transaction
//! and the database runs in WAL mode with `synchronous = FULL`, so an append
//! that returned has reached disk.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use stepwise_core::{CoreError, DurableLog};

pub mod log;

pub use log::SqliteDurableLog;

/// Configuration for the SQLite store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://.stepwise/state.db`
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Timeout for acquiring a connection from the pool (in seconds)
    pub acquire_timeout_secs: u64,

    /// Whether to run migrations on startup
    pub run_migrations: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://.stepwise/state.db".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 30,
            run_migrations: true,
        }
    }
}

impl SqliteConfig {
    /// Default settings for a database URL
    pub fn for_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// SQLite connection wrapper
#[derive(Clone)]
pub struct SqliteConnection {
    pool: SqlitePool,
}

impl SqliteConnection {
    /// Open (creating if missing) the database described by `config`
    pub async fn new(config: &SqliteConfig) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| {
                CoreError::ConfigurationError(format!(
                    "Invalid SQLite URL '{}': {}",
                    config.database_url, e
                ))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    CoreError::StateStoreError(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| {
                CoreError::StateStoreError(format!("Failed to open SQLite database: {}", e))
            })?;

        debug!(url = %config.database_url, "Connected to SQLite database");

        let conn = Self { pool };
        if config.run_migrations {
            conn.run_migrations().await?;
        }

        Ok(conn)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        debug!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Failed to run migrations: {}", e)))?;
        debug!("Migrations complete");
        Ok(())
    }

    /// Get the database connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Open the store and hand it out as a durable log
pub async fn connect(config: &SqliteConfig) -> Result<Arc<dyn DurableLog>, CoreError> {
    let log = SqliteDurableLog::new(SqliteConnection::new(config).await?);
    info!(url = %config.database_url, "Using SQLite durable log");
    Ok(Arc::new(log))
}
