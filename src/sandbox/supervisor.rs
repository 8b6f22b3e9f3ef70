//! The container supervisor: orchestrates policy, resources, mounts, the
//! alias endpoint, the bootstrap stage, and the container lifecycle.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Sandbox                                  │
//! │                                                                       │
//! │  policy ─▶ resources ─▶ mounts ─▶ alias endpoint ─▶ bootstrap stage  │
//! │                                                        │              │
//! │                                                        ▼              │
//! │   ensure image ─▶ create ─▶ attach ─▶ start ─▶ pump stdio / wait     │
//! │                                                        │              │
//! │                                  cleanup (reverse order, best-effort)│
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `run` drives a sandbox to completion; `start` hands back a [`Session`]
//! as soon as the container is running. Cleanup is bound to the supervise
//! future and runs on every exit path: terminal state restored, resize
//! watcher stopped, attach stream closed, staged bootstrap removed, alias
//! endpoint shut down.

use std::pin::Pin;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, CreateContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use futures::StreamExt;
use tokio::sync::oneshot;

use crate::alias::{AliasEndpoint, AliasEndpointConfig, ShellExecutor, build_entries};
use crate::policy::Policy;
use crate::sandbox::bootstrap::{BootstrapStage, READY_MARKER};
use crate::sandbox::config::{HOST_GATEWAY_ALIAS, SandboxConfig};
use crate::sandbox::docker as docker_mod;
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::hostenv::{self, HostIds};
use crate::sandbox::plan::{AliasCoordinates, assemble_plan};
use crate::sandbox::resources::select_resources;
use crate::sandbox::session::Session;
use crate::sandbox::stdio::{
    CtrlCFilter, OutputWriter, RawModeGuard, ReadyMarkerDetector, copy_container_output,
    copy_stdin, spawn_resize_forwarder,
};

/// A sandbox invocation.
pub struct Sandbox {
    config: SandboxConfig,
}

/// Everything assembled and started, ready to be supervised.
struct Prepared {
    docker: Docker,
    container_id: String,
    attach: AttachContainerResults,
    endpoint: Option<AliasEndpoint>,
    stage: BootstrapStage,
    use_tty: bool,
    stop_timeout: Duration,
    stdout: OutputWriter,
    stderr: OutputWriter,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Run the sandbox to completion. Returns the container's exit status
    /// (always 0; non-zero statuses surface as
    /// [`SandboxError::ContainerExit`]).
    pub async fn run(self) -> Result<i64> {
        let prepared = self.prepare().await?;
        // Held for the lifetime of the run; dropping it would cancel.
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        supervise(prepared, shutdown_rx).await
    }

    /// Start the sandbox and hand it over to a [`Session`].
    pub async fn start(self) -> Result<Session> {
        let stop_timeout = self.config.stop_timeout;
        let prepared = self.prepare().await?;
        let docker = prepared.docker.clone();
        let container_id = prepared.container_id.clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(supervise(prepared, shutdown_rx));

        Ok(Session::new(
            container_id,
            docker,
            stop_timeout,
            shutdown_tx,
            handle,
        ))
    }

    /// Build everything up to a started, attached container.
    async fn prepare(self) -> Result<Prepared> {
        let config = self.config;

        let host_env = hostenv::host_env();
        let ids = effective_host_ids(config.host_ids_override);

        let policy_path = config.effective_policy_path();
        let load = Policy::load(&policy_path, &host_env, &config.template_vars)?;
        if load.used_default {
            tracing::info!("no policy file found, using the built-in default policy");
        }
        let policy = load.policy;

        let docker = docker_mod::connect().await?;

        // The endpoint must be listening before the container is created so
        // its env vars exist at create time. No calls, no endpoint.
        let selected = select_resources(&policy, &config.rw_paths, &config.extra_resources)?;
        let calls = selected.calls();
        let endpoint = if calls.is_empty() {
            None
        } else {
            let entries = build_entries(&calls)?;
            let executor = ShellExecutor::new(&config.workdir);
            Some(AliasEndpoint::start(entries, executor, AliasEndpointConfig::default()).await?)
        };

        let stage = BootstrapStage::new()?;

        let alias = endpoint.as_ref().map(|endpoint| AliasCoordinates {
            url: endpoint.url_for_host(HOST_GATEWAY_ALIAS),
            token: endpoint.token().to_string(),
            session_id: endpoint.session_id().to_string(),
            port: endpoint.port(),
        });
        let plan = assemble_plan(&config, &policy, &host_env, ids, alias.as_ref(), &stage)?;
        tracing::debug!(resources = ?plan.resource_names, "selected resource sets");

        docker_mod::ensure_image(&docker, &plan.image).await?;

        let use_tty = plan.use_tty;
        let spec = plan.to_container_config();

        let name = format!("shai-{}", uuid::Uuid::new_v4());
        let options = CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        };
        let created = docker
            .create_container(Some(options), spec)
            .await
            .map_err(|e| SandboxError::ContainerCreationFailed {
                reason: e.to_string(),
            })?;
        let container_id = created.id;
        tracing::info!(container = %name, image = %plan.image, "sandbox container created");

        let attach = docker
            .attach_container(
                &container_id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(use_tty),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    detach_keys: None,
                }),
            )
            .await
            .map_err(|e| SandboxError::AttachFailed {
                reason: e.to_string(),
            })?;

        docker
            .start_container::<String>(&container_id, None)
            .await
            .map_err(|e| SandboxError::ContainerStartFailed {
                reason: e.to_string(),
            })?;

        let stdout: OutputWriter = config
            .stdout
            .unwrap_or_else(|| Box::pin(tokio::io::stdout()));
        let stderr: OutputWriter = config
            .stderr
            .unwrap_or_else(|| Box::pin(tokio::io::stderr()));

        Ok(Prepared {
            docker,
            container_id,
            attach,
            endpoint,
            stage,
            use_tty,
            stop_timeout: config.stop_timeout,
            stdout,
            stderr,
        })
    }
}

/// Pump stdio and wait for the container, then clean up in reverse order of
/// setup. Cleanup errors are absorbed.
async fn supervise(prepared: Prepared, mut shutdown_rx: oneshot::Receiver<()>) -> Result<i64> {
    let Prepared {
        docker,
        container_id,
        attach,
        mut endpoint,
        stage,
        use_tty,
        stop_timeout,
        mut stdout,
        mut stderr,
    } = prepared;

    // Raw mode only for TTY runs, and only while we supervise. The guard
    // restores the terminal on every exit path, including unwinds.
    let raw_guard = use_tty.then(RawModeGuard::enable);
    let resize_task = use_tty.then(|| spawn_resize_forwarder(docker.clone(), container_id.clone()));

    let filter = CtrlCFilter::new();
    let enable = filter.enable_handle();
    let mut detector = ReadyMarkerDetector::new(READY_MARKER, move || enable.enable());

    let AttachContainerResults { output, input } = attach;

    let stdin_task = use_tty.then(|| {
        let filter = filter.clone();
        tokio::spawn(async move { copy_stdin(tokio::io::stdin(), input, filter).await })
    });

    let mut copy_fut: Pin<Box<dyn futures::Future<Output = std::io::Result<()>> + Send>> =
        Box::pin(copy_container_output(
            output,
            &mut stdout,
            &mut stderr,
            &mut detector,
        ));
    let mut copy_done = false;

    let mut wait_stream = docker.wait_container(
        &container_id,
        Some(WaitContainerOptions {
            condition: "not-running",
        }),
    );

    let outcome: Result<i64> = loop {
        tokio::select! {
            next = wait_stream.next() => {
                break match next {
                    Some(Ok(response)) => Ok(response.status_code),
                    Some(Err(bollard::errors::Error::DockerContainerWaitError {
                        code, ..
                    })) => Ok(code),
                    Some(Err(e)) => Err(e.into()),
                    None => Ok(0),
                };
            }
            result = &mut copy_fut, if !copy_done => {
                match result {
                    // Stream EOF is not an error; keep waiting for the exit
                    // status.
                    Ok(()) => copy_done = true,
                    Err(e) => break Err(e.into()),
                }
            }
            _ = &mut shutdown_rx => {
                let _ = docker
                    .stop_container(
                        &container_id,
                        Some(StopContainerOptions {
                            t: stop_timeout.as_secs() as i64,
                        }),
                    )
                    .await;
                break Err(SandboxError::Cancelled);
            }
        }
    };

    drop(copy_fut);

    // Cleanup, reverse order of setup; all best-effort.
    if let Some(task) = stdin_task {
        task.abort();
    }
    if let Some(task) = resize_task {
        task.abort();
    }
    drop(raw_guard);
    drop(stage);
    if let Some(endpoint) = endpoint.as_mut() {
        endpoint.shutdown().await;
    }
    drop(docker);

    match outcome {
        Ok(0) => Ok(0),
        Ok(status) => Err(SandboxError::ContainerExit { status }),
        Err(e) => Err(e),
    }
}

/// Host identity actually applied to a run (override or detected, with the
/// root substitution). Exposed for diagnostics.
pub fn effective_host_ids(override_ids: Option<HostIds>) -> HostIds {
    match override_ids {
        Some(ids) => hostenv::substitute_root(ids.uid, ids.gid),
        None => hostenv::host_ids(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::hostenv::ROOT_SUBSTITUTE_ID;

    #[test]
    fn test_effective_ids_substitute_root_override() {
        let ids = effective_host_ids(Some(HostIds { uid: 0, gid: 0 }));
        assert_eq!(ids.uid, ROOT_SUBSTITUTE_ID);
        assert_eq!(ids.gid, ROOT_SUBSTITUTE_ID);
    }

    #[test]
    fn test_effective_ids_pass_through() {
        let ids = effective_host_ids(Some(HostIds {
            uid: 1000,
            gid: 1000,
        }));
        assert_eq!(ids.uid, 1000);
    }
}
