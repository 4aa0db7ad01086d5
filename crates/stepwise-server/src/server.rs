//! Main Stepwise server implementation

use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use stepwise_core::{InstanceId, WorkflowRuntime};

use crate::api::build_router;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// HTTP front end over a workflow runtime
#[derive(Clone)]
pub struct StepwiseServer {
    /// Configuration
    pub config: ServerConfig,

    runtime: WorkflowRuntime,
}

impl std::fmt::Debug for StepwiseServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepwiseServer")
            .field("config", &self.config)
            .finish()
    }
}

impl StepwiseServer {
    pub fn new(config: ServerConfig, runtime: WorkflowRuntime) -> Self {
        Self { config, runtime }
    }

    pub fn runtime(&self) -> &WorkflowRuntime {
        &self.runtime
    }

    /// Router serving this server's runtime
    pub fn router(&self) -> Router {
        build_router(Arc::new(self.clone()))
    }

    /// Optionally wipe state, then rebuild from the log and resume work
    pub async fn start(&self) -> ServerResult<Vec<InstanceId>> {
        if self.config.reset_state_on_start {
            warn!("RESET_STATE_ON_START is set, discarding stored instances");
            self.runtime.reset().await?;
        }
        let resumed = self.runtime.start().await?;
        Ok(resumed)
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address: SocketAddr = listener.local_addr()?;
        info!("Stepwise server listening on {}", address);

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        self.runtime.shutdown();
        info!("Stepwise server stopped");

        result.map_err(|e| ServerError::InternalError(format!("Server error: {}", e)))
    }

    /// Start the runtime, bind the configured address and serve until Ctrl+C
    pub async fn run(self) -> ServerResult<()> {
        info!("Starting Stepwise server");
        let resumed = self.start().await?;
        info!(resumed = resumed.len(), "Runtime ready");

        let listener = TcpListener::bind(self.config.listen_address())
            .await
            .map_err(|e| {
                ServerError::ConfigError(format!(
                    "Failed to bind {}: {}",
                    self.config.listen_address(),
                    e
                ))
            })?;

        self.serve(listener, shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
