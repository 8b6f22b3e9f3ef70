//! Supervisor configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policy::{POLICY_DIR, POLICY_FILE_NAME};
use crate::sandbox::hostenv::HostIds;
use crate::sandbox::stdio::OutputWriter;

/// Default graceful-stop timeout for sessions.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Container-side alias for the host gateway; the supervisor adds an extra
/// hosts entry binding it.
pub const HOST_GATEWAY_ALIAS: &str = "host.docker.internal";

/// Command to run inside the sandbox after setup, instead of a login shell.
#[derive(Debug, Clone, Default)]
pub struct PostSetupExec {
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
    /// Optional directory (relative to the workspace or absolute) to enter
    /// before the command runs.
    pub workdir: Option<String>,
    pub use_tty: bool,
}

/// Everything a sandbox run needs from the caller.
pub struct SandboxConfig {
    /// Host workspace root.
    pub workdir: PathBuf,
    /// Policy file path; defaults to `<workdir>/.shai/sandbox.yaml`.
    pub policy_path: Option<PathBuf>,
    /// `${{ vars.X }}` values for template expansion.
    pub template_vars: HashMap<String, String>,
    /// Workspace-relative paths to mount read-write (`"."` for the root).
    pub rw_paths: Vec<String>,
    /// Extra resource-set names activated in addition to the apply rules.
    pub extra_resources: Vec<String>,
    pub verbose: bool,
    /// Post-setup command; `None` runs an interactive login shell on a TTY.
    pub exec: Option<PostSetupExec>,
    /// Caller-supplied sinks for non-TTY output; default to the process
    /// stdout/stderr.
    pub stdout: Option<OutputWriter>,
    pub stderr: Option<OutputWriter>,
    pub stop_timeout: Duration,
    /// Overrides the policy/apply-rule image.
    pub image_override: Option<String>,
    /// Overrides the detected host UID/GID.
    pub host_ids_override: Option<HostIds>,
    /// Overrides the policy's target user name.
    pub user_override: Option<String>,
    /// Force a privileged container regardless of resource options.
    pub privileged: bool,
}

impl SandboxConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            policy_path: None,
            template_vars: HashMap::new(),
            rw_paths: Vec::new(),
            extra_resources: Vec::new(),
            verbose: false,
            exec: None,
            stdout: None,
            stderr: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            image_override: None,
            host_ids_override: None,
            user_override: None,
            privileged: false,
        }
    }

    pub fn rw_paths(mut self, paths: Vec<String>) -> Self {
        self.rw_paths = paths;
        self
    }

    pub fn extra_resources(mut self, names: Vec<String>) -> Self {
        self.extra_resources = names;
        self
    }

    pub fn template_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.template_vars = vars;
        self
    }

    pub fn policy_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy_path = Some(path.into());
        self
    }

    pub fn exec(mut self, exec: PostSetupExec) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image_override = Some(image.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user_override = Some(user.into());
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn host_ids(mut self, ids: HostIds) -> Self {
        self.host_ids_override = Some(ids);
        self
    }

    pub fn stdout_writer(mut self, writer: OutputWriter) -> Self {
        self.stdout = Some(writer);
        self
    }

    pub fn stderr_writer(mut self, writer: OutputWriter) -> Self {
        self.stderr = Some(writer);
        self
    }

    /// The policy file this run reads.
    pub fn effective_policy_path(&self) -> PathBuf {
        match &self.policy_path {
            Some(path) => path.clone(),
            None => self.workdir.join(POLICY_DIR).join(POLICY_FILE_NAME),
        }
    }

    /// Whether the post-setup command wants a TTY.
    pub fn use_tty(&self) -> bool {
        match &self.exec {
            Some(exec) => exec.use_tty,
            None => true,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}
