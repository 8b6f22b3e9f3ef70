//! Error types for shai.

/// Top-level error type for the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Mount error: {0}")]
    Mount(#[from] MountError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Alias error: {0}")]
    Alias(#[from] AliasError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),
}

/// Policy loading, template expansion, and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Failed to parse policy: {0}")]
    Parse(String),

    #[error("Policy type must be \"shai-sandbox\", found {found:?}")]
    WrongType { found: String },

    #[error("Policy version must be 1, found {found}")]
    WrongVersion { found: i64 },

    #[error("Policy image must not be empty")]
    EmptyImage,

    #[error("Policy must declare at least one resource set")]
    NoResources,

    #[error("Policy must declare at least one apply rule")]
    NoApplyRules,

    #[error("Unresolved template reference ${{{{ {reference} }}}}")]
    UnresolvedTemplate { reference: String },

    #[error("Unknown template scope {scope:?} in ${{{{ {reference} }}}}")]
    UnknownTemplateScope { scope: String, reference: String },

    #[error("Resource {resource:?} var references missing host environment variable {var:?}")]
    MissingEnvVar { resource: String, var: String },

    #[error("Invalid mount mode {mode:?} in resource {resource:?} (expected ro or rw)")]
    InvalidMode { resource: String, mode: String },

    #[error("Invalid call name {name:?} in resource {resource:?} (expected [a-z0-9_-]+)")]
    InvalidCallName { resource: String, name: String },

    #[error("Invalid argument pattern for call {call:?}: {reason}")]
    InvalidRegex { call: String, reason: String },

    #[error("Invalid port {value} in resource {resource:?} (expected 1..=65535)")]
    InvalidPort { resource: String, value: i64 },

    #[error("Invalid protocol {value:?} in resource {resource:?} (expected tcp or udp)")]
    InvalidProtocol { resource: String, value: String },

    #[error("Duplicate exposed port {host_port}/{protocol} in resource {resource:?}")]
    DuplicateExpose {
        resource: String,
        host_port: u16,
        protocol: String,
    },

    #[error("Apply rule {path:?} references unknown resource set {name:?}")]
    UnknownResource { path: String, name: String },

    #[error("Apply rule for the workspace root must not set an image override")]
    RootImageOverride,

    #[error("Conflicting call {name:?} for path {path:?} (declared by more than one resource set)")]
    ConflictingCalls { path: String, name: String },

    #[error("Conflicting exposed port {host_port}/{protocol} for path {path:?}")]
    ConflictingPorts {
        path: String,
        host_port: u16,
        protocol: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mount planning errors.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Working directory does not exist: {path}")]
    WorkdirNotFound { path: String },

    #[error("Read-write subpath does not exist: {path}")]
    SubpathNotFound { path: String },

    #[error("Read-write subpath escapes the workspace: {path}")]
    PathEscapes { path: String },

    #[error("Read-write subpaths conflict: {parent:?} contains {child:?}")]
    PathConflict { parent: String, child: String },
}

/// Resource aggregation errors.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Unknown resource set {name:?}")]
    UnknownResource { name: String },
}

/// Host environment and Docker socket discovery errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("DOCKER_HOST {host:?} is not usable: {reason}")]
    DockerHostUnreachable { host: String, reason: String },

    #[error("No usable Docker socket found:\n{attempts}")]
    NoDockerSocket { attempts: String },
}

/// Alias endpoint and call execution errors.
#[derive(Debug, thiserror::Error)]
pub enum AliasError {
    #[error("Invalid argument pattern for call {call:?}: {reason}")]
    InvalidPattern { call: String, reason: String },

    #[error("Call {name:?} rejected arguments {args:?}")]
    ArgumentsRejected { name: String, args: String },

    #[error("Unknown call {name:?}")]
    UnknownTool { name: String },

    #[error("Duplicate call {name:?} across selected resource sets")]
    DuplicateTool { name: String },

    #[error("All call slots are busy")]
    Busy,

    #[error("Call execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Endpoint startup failed: {reason}")]
    Startup { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_template_names_reference() {
        let err = PolicyError::UnresolvedTemplate {
            reference: "env.MISSING".to_string(),
        };
        assert!(err.to_string().contains("env.MISSING"));
    }

    #[test]
    fn test_missing_env_var_names_var_and_resource() {
        let err = PolicyError::MissingEnvVar {
            resource: "git".to_string(),
            var: "GIT_TOKEN".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("GIT_TOKEN"));
        assert!(msg.contains("git"));
    }

    #[test]
    fn test_mount_conflict_display() {
        let err = MountError::PathConflict {
            parent: "dir1".to_string(),
            child: "dir1/sub".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dir1"));
        assert!(msg.contains("dir1/sub"));
    }

    #[test]
    fn test_alias_arguments_rejected_mentions_arguments() {
        let err = AliasError::ArgumentsRejected {
            name: "hello".to_string(),
            args: "--msg=Bad".to_string(),
        };
        assert!(err.to_string().to_lowercase().contains("arguments"));
    }

    #[test]
    fn test_top_level_wraps_policy() {
        let err: Error = PolicyError::EmptyImage.into();
        assert!(err.to_string().contains("image"));
    }
}
