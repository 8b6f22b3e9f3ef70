//! Docker client discovery and image management.
//!
//! `DOCKER_HOST` wins when set. Otherwise a canonical list of loopback
//! socket paths is probed in sorted order: Linux system sockets, rootless
//! per-UID sockets, Docker Desktop user sockets, and their Podman
//! equivalents. Each candidate is stat-checked, connected, and pinged with
//! a short timeout; the first responsive daemon wins.

use std::path::PathBuf;
use std::time::Duration;

use bollard::Docker;
use bollard::image::CreateImageOptions;
use futures::StreamExt;

use crate::error::HostError;
use crate::sandbox::error::{Result, SandboxError};

const PING_TIMEOUT: Duration = Duration::from_secs(2);
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Connect to a Docker-compatible daemon.
pub async fn connect() -> Result<Docker> {
    if let Ok(host) = std::env::var("DOCKER_HOST") {
        // bollard's local defaults honor DOCKER_HOST.
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::from(HostError::DockerHostUnreachable {
                host: host.clone(),
                reason: e.to_string(),
            })
        })?;
        return match ping(&docker).await {
            Ok(()) => Ok(docker),
            Err(reason) => Err(HostError::DockerHostUnreachable { host, reason }.into()),
        };
    }

    let mut attempts = Vec::new();
    for path in candidate_sockets() {
        match probe_socket(&path).await {
            Ok(docker) => {
                tracing::debug!(socket = %path.display(), "connected to Docker daemon");
                return Ok(docker);
            }
            Err(reason) => attempts.push(format!("  {}: {}", path.display(), reason)),
        }
    }

    Err(HostError::NoDockerSocket {
        attempts: attempts.join("\n"),
    }
    .into())
}

/// Candidate socket paths across platform conventions, deduplicated and
/// sorted for a stable probe order.
fn candidate_sockets() -> Vec<PathBuf> {
    // SAFETY: getuid is always safe to call.
    let uid = unsafe { libc::getuid() };

    let mut candidates = vec![
        PathBuf::from("/var/run/docker.sock"),
        PathBuf::from("/run/docker.sock"),
        PathBuf::from("/var/run/podman/podman.sock"),
        PathBuf::from(format!("/run/user/{uid}/docker.sock")),
        PathBuf::from(format!("/run/user/{uid}/podman/podman.sock")),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".docker/run/docker.sock"));
        candidates.push(home.join(".docker/desktop/docker.sock"));
        candidates.push(home.join(".local/share/containers/podman/machine/podman.sock"));
    }

    candidates.sort();
    candidates.dedup();
    candidates
}

async fn probe_socket(path: &std::path::Path) -> std::result::Result<Docker, String> {
    use std::os::unix::fs::FileTypeExt;

    let meta = std::fs::metadata(path).map_err(|e| format!("stat failed: {e}"))?;
    if !meta.file_type().is_socket() {
        return Err("not a socket".to_string());
    }

    let docker = Docker::connect_with_socket(
        &path.to_string_lossy(),
        CLIENT_TIMEOUT_SECS,
        bollard::API_DEFAULT_VERSION,
    )
    .map_err(|e| format!("connect failed: {e}"))?;

    ping(&docker).await?;
    Ok(docker)
}

async fn ping(docker: &Docker) -> std::result::Result<(), String> {
    match tokio::time::timeout(PING_TIMEOUT, docker.ping()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("ping failed: {e}")),
        Err(_) => Err(format!("ping timed out after {PING_TIMEOUT:?}")),
    }
}

/// Make sure `image` is present locally, pulling it when missing. Pull
/// progress is drained and discarded.
pub async fn ensure_image(docker: &Docker, image: &str) -> Result<()> {
    if docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }

    tracing::info!(image, "pulling sandbox image");

    let options = CreateImageOptions {
        from_image: image.to_string(),
        ..Default::default()
    };
    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(progress) = stream.next().await {
        match progress {
            Ok(info) => {
                if let Some(status) = info.status {
                    tracing::debug!(image, status, "pull progress");
                }
            }
            Err(e) => {
                return Err(SandboxError::ImagePullFailed {
                    image: image.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(image, "image pulled");
    Ok(())
}
