//!
//! Stepwise Server - HTTP control surface for the Stepwise workflow runtime
//!
//! This module wires configuration, logging, the state store and the
//! runtime together and exposes them over axum.

use std::sync::Arc;

/// API module
pub mod api;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

/// Server module
pub mod server;

/// Built-in workflow definitions
pub mod workflows;

// Re-export key types
pub use config::{LogFormat, ServerConfig, StateStoreKind};
pub use error::{ServerError, ServerResult};
pub use server::StepwiseServer;

use stepwise_core::{
    DurableLog, EngineConfig, MemoryDurableLog, TracingEventHandler, WorkflowCatalog,
    WorkflowRuntime,
};
use stepwise_state_sqlite::SqliteConfig;

/// Run function
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    // Initialize logging
    init_logging(&config);

    let log = build_state_store(&config).await?;
    let runtime = build_runtime(&config, log)?;

    StepwiseServer::new(config, runtime).run().await
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &ServerConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let installed = match config.log_format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Open the durable log named by `state_store_url`
pub async fn build_state_store(config: &ServerConfig) -> ServerResult<Arc<dyn DurableLog>> {
    match config.state_store()? {
        StateStoreKind::Memory => {
            tracing::warn!("Using in-memory durable log; instances will not survive a restart");
            Ok(Arc::new(MemoryDurableLog::new()))
        }
        StateStoreKind::Sqlite(url) => {
            let log = stepwise_state_sqlite::connect(&SqliteConfig::for_url(url)).await?;
            Ok(log)
        }
    }
}

/// Runtime over `log` with the built-in workflows registered
pub fn build_runtime(
    config: &ServerConfig,
    log: Arc<dyn DurableLog>,
) -> ServerResult<WorkflowRuntime> {
    let runtime = WorkflowRuntime::new(
        log,
        WorkflowCatalog::new(),
        Arc::new(TracingEventHandler),
        EngineConfig {
            max_batch_size: config.max_batch_size,
            ..EngineConfig::default()
        },
    );

    for definition in workflows::builtin()? {
        runtime.register(definition);
    }

    Ok(runtime)
}
