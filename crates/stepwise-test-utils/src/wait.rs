//! Bounded polling helpers.

use crate::assertions::StatusAssertionError;
use std::future::Future;
use std::time::{Duration, Instant};
use stepwise_core::{InstanceStatus, InstanceStatusView, WorkflowRuntime};

/// Default polling budget
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `check` until it yields `Some`, or give up after `timeout`
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll an instance until it reaches `expected`
pub async fn wait_for_status(
    runtime: &WorkflowRuntime,
    id: &str,
    expected: InstanceStatus,
    timeout: Duration,
) -> Result<InstanceStatusView, StatusAssertionError> {
    poll(runtime, id, timeout, |view| view.status == expected).await
}

/// Poll an instance until it is complete or errored
pub async fn wait_for_terminal(
    runtime: &WorkflowRuntime,
    id: &str,
    timeout: Duration,
) -> Result<InstanceStatusView, StatusAssertionError> {
    poll(runtime, id, timeout, |view| view.status.is_terminal()).await
}

async fn poll(
    runtime: &WorkflowRuntime,
    id: &str,
    timeout: Duration,
    done: impl Fn(&InstanceStatusView) -> bool,
) -> Result<InstanceStatusView, StatusAssertionError> {
    let started = Instant::now();
    let deadline = started + timeout;
    loop {
        let view = runtime
            .status(id)
            .await
            .map_err(|e| StatusAssertionError::Lookup(e.to_string()))?;
        if done(&view) {
            return Ok(view);
        }
        if Instant::now() >= deadline {
            return Err(StatusAssertionError::Timeout {
                waited_ms: started.elapsed().as_millis() as u64,
                last: format!("{:?}", view),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
