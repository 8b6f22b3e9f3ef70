//! Error types for the container sandbox.

use crate::error::{AliasError, HostError, MountError, PolicyError, ResourceError};

/// Errors that can occur while provisioning or supervising a sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Policy failed to load or validate.
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Mount plan could not be produced.
    #[error("Mount error: {0}")]
    Mount(#[from] MountError),

    /// Resource aggregation failed.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Docker socket discovery or host identity failed.
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Alias endpoint failed.
    #[error("Alias error: {0}")]
    Alias(#[from] AliasError),

    /// Image pull failed.
    #[error("Image pull failed for {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    /// Failed to create container.
    #[error("Container creation failed: {reason}")]
    ContainerCreationFailed { reason: String },

    /// Failed to start container.
    #[error("Container start failed: {reason}")]
    ContainerStartFailed { reason: String },

    /// Failed to attach to the container's stdio.
    #[error("Container attach failed: {reason}")]
    AttachFailed { reason: String },

    /// The container exited with a non-zero status.
    #[error("Sandbox exited with status {status}")]
    ContainerExit { status: i64 },

    /// The run was cancelled before the container exited.
    #[error("Sandbox run cancelled")]
    Cancelled,

    /// Invalid supervisor configuration.
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_exit_display() {
        let err = SandboxError::ContainerExit { status: 90 };
        assert!(err.to_string().contains("90"));
    }

    #[test]
    fn test_policy_error_wraps() {
        let err: SandboxError = PolicyError::EmptyImage.into();
        assert!(err.to_string().contains("image"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = SandboxError::from(io_err);
        assert!(err.to_string().contains("access denied"));
    }
}
