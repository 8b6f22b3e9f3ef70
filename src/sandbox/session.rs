//! Long-running sandbox sessions for library callers.

use std::time::Duration;

use bollard::Docker;
use bollard::container::StopContainerOptions;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::sandbox::error::{Result, SandboxError};

/// Supervises a started container: wait, graceful stop, close.
///
/// Produced by [`Sandbox::start`](crate::sandbox::Sandbox::start). The
/// session owns the background supervise task and its shutdown signal; the
/// Docker client is shared with the supervisor.
pub struct Session {
    container_id: String,
    docker: Docker,
    stop_timeout: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<i64>>>,
    exit_status: Option<i64>,
}

impl Session {
    pub(crate) fn new(
        container_id: String,
        docker: Docker,
        stop_timeout: Duration,
        shutdown_tx: oneshot::Sender<()>,
        handle: JoinHandle<Result<i64>>,
    ) -> Self {
        Self {
            container_id,
            docker,
            stop_timeout,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            exit_status: None,
        }
    }

    /// Identifier of the supervised container.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Wait for the sandbox to finish and return its exit status. A zero
    /// status is `Ok(0)`; non-zero statuses surface as
    /// [`SandboxError::ContainerExit`] from the supervise task.
    pub async fn wait(&mut self) -> Result<i64> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let handle = self.handle.take().ok_or_else(|| SandboxError::Config {
            reason: "session already closed".to_string(),
        })?;
        let status = handle.await.map_err(|e| SandboxError::Config {
            reason: format!("supervise task panicked: {e}"),
        })??;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Gracefully stop the container with the configured timeout.
    pub async fn stop(&self) -> Result<()> {
        let options = StopContainerOptions {
            t: self.stop_timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(&self.container_id, Some(options))
            .await?;
        Ok(())
    }

    /// Cancel the supervise task and wait for its cleanup to finish.
    /// Idempotent; errors from the unwinding run are absorbed.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(Ok(status)) => self.exit_status = Some(status),
                Ok(Err(e)) => tracing::debug!(error = %e, "session closed with error"),
                Err(e) => tracing::debug!(error = %e, "supervise task join failed"),
            }
        }
    }
}
