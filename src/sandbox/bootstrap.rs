//! Host half of the bootstrap payload: staging and argument assembly.
//!
//! The bootstrap program and its config templates are immutable bytes
//! compiled into the binary. At run time they are written to a temporary
//! staging directory on the host and bind-mounted into the container at
//! [`BOOTSTRAP_MOUNT`], where `boot.sh` runs as the entrypoint. The staging
//! directory is removed when the stage is dropped.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Fixed prefix of the summary line bootstrap emits once isolation is in
/// place, just before the privilege drop. The supervisor's stdout detector
/// watches for exactly this text.
pub const READY_MARKER: &str = "[shai] sandbox ready";

/// Mount point of the staged payload inside the container.
pub const BOOTSTRAP_MOUNT: &str = "/shai-bootstrap";

/// Bootstrap argument schema version.
pub const BOOTSTRAP_SCHEMA_VERSION: u32 = 1;

const BOOT_SCRIPT: &str = include_str!("payload/boot.sh");
const REMOTE_CLIENT: &str = include_str!("payload/shai-remote");
const PROXY_CONF: &str = include_str!("payload/conf/tinyproxy.conf.tmpl");
const DNS_CONF: &str = include_str!("payload/conf/dnsmasq.conf.tmpl");

/// A staged copy of the bootstrap payload on the host filesystem.
///
/// Layout: `${TMP}/shai-<random>/shai-bootstrap/{boot.sh, shai-remote,
/// conf/...}`.
#[derive(Debug)]
pub struct BootstrapStage {
    root: TempDir,
    dir: PathBuf,
}

impl BootstrapStage {
    /// Materialize the payload into a fresh temporary directory.
    pub fn new() -> io::Result<Self> {
        let root = tempfile::Builder::new().prefix("shai-").tempdir()?;
        let dir = root.path().join("shai-bootstrap");
        let conf = dir.join("conf");
        std::fs::create_dir_all(&conf)?;

        write_file(&dir.join("boot.sh"), BOOT_SCRIPT, 0o755)?;
        write_file(&dir.join("shai-remote"), REMOTE_CLIENT, 0o755)?;
        write_file(&conf.join("tinyproxy.conf.tmpl"), PROXY_CONF, 0o644)?;
        write_file(&conf.join("dnsmasq.conf.tmpl"), DNS_CONF, 0o644)?;

        Ok(Self { root, dir })
    }

    /// Host path of the staged `shai-bootstrap` directory.
    pub fn host_dir(&self) -> &Path {
        &self.dir
    }

    /// Bind specification mounting the stage into the container.
    ///
    /// Mounted read-write so `--rm true` lets boot.sh unlink itself after
    /// argument parsing.
    pub fn bind_spec(&self) -> String {
        format!("{}:{}:rw", self.dir.display(), BOOTSTRAP_MOUNT)
    }

    /// In-container entrypoint path.
    pub fn entrypoint() -> String {
        format!("{BOOTSTRAP_MOUNT}/boot.sh")
    }

    /// Root of the temporary tree (for diagnostics).
    pub fn staging_root(&self) -> &Path {
        self.root.path()
    }
}

fn write_file(path: &Path, contents: &str, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Arguments the supervisor passes to `boot.sh`.
#[derive(Debug, Clone, Default)]
pub struct BootstrapArgs {
    pub user: String,
    pub workspace: String,
    pub image: String,
    /// `KEY=VALUE` pairs exported before the privilege drop.
    pub exec_env: Vec<String>,
    /// Argv of the post-setup command; empty means a login shell.
    pub exec_cmd: Vec<String>,
    pub http_allow: Vec<String>,
    /// `host:port` TCP pairs allowed as direct egress.
    pub port_allow: Vec<String>,
    pub resource_names: Vec<String>,
    pub root_cmds: Vec<String>,
    /// `HOSTPORT:CTRPORT/PROTO` display entries.
    pub expose: Vec<String>,
    pub verbose: bool,
    pub remove_self: bool,
}

impl BootstrapArgs {
    /// Render the full bootstrap argv (not including the entrypoint itself).
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec![
            "--schema-version".to_string(),
            BOOTSTRAP_SCHEMA_VERSION.to_string(),
            "--user".to_string(),
            self.user.clone(),
            "--workspace".to_string(),
            self.workspace.clone(),
            "--image".to_string(),
            self.image.clone(),
        ];
        for pair in &self.exec_env {
            argv.push("--exec-env".to_string());
            argv.push(pair.clone());
        }
        for arg in &self.exec_cmd {
            argv.push("--exec-cmd".to_string());
            argv.push(arg.clone());
        }
        for host in &self.http_allow {
            argv.push("--http-allow".to_string());
            argv.push(host.clone());
        }
        for entry in &self.port_allow {
            argv.push("--port-allow".to_string());
            argv.push(entry.clone());
        }
        for name in &self.resource_names {
            argv.push("--resource-name".to_string());
            argv.push(name.clone());
        }
        for cmd in &self.root_cmds {
            argv.push("--root-cmd".to_string());
            argv.push(cmd.clone());
        }
        for entry in &self.expose {
            argv.push("--expose".to_string());
            argv.push(entry.clone());
        }
        if self.verbose {
            argv.push("--verbose".to_string());
        }
        if self.remove_self {
            argv.push("--rm".to_string());
            argv.push("true".to_string());
        }
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_materializes_payload() {
        let stage = BootstrapStage::new().unwrap();
        assert!(stage.host_dir().join("boot.sh").is_file());
        assert!(stage.host_dir().join("shai-remote").is_file());
        assert!(stage.host_dir().join("conf/tinyproxy.conf.tmpl").is_file());
        assert!(stage.host_dir().join("conf/dnsmasq.conf.tmpl").is_file());
    }

    #[test]
    fn test_stage_scripts_executable() {
        use std::os::unix::fs::PermissionsExt;

        let stage = BootstrapStage::new().unwrap();
        let mode = std::fs::metadata(stage.host_dir().join("boot.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_stage_removed_on_drop() {
        let stage = BootstrapStage::new().unwrap();
        let path = stage.staging_root().to_path_buf();
        assert!(path.exists());
        drop(stage);
        assert!(!path.exists());
    }

    #[test]
    fn test_stage_path_shape() {
        let stage = BootstrapStage::new().unwrap();
        assert!(stage.host_dir().ends_with("shai-bootstrap"));
        let root_name = stage
            .staging_root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(root_name.starts_with("shai-"));
    }

    #[test]
    fn test_bind_spec_and_entrypoint() {
        let stage = BootstrapStage::new().unwrap();
        let spec = stage.bind_spec();
        assert!(spec.ends_with(":/shai-bootstrap:rw"));
        assert_eq!(BootstrapStage::entrypoint(), "/shai-bootstrap/boot.sh");
    }

    #[test]
    fn test_minimal_argv() {
        let args = BootstrapArgs {
            user: "shai".to_string(),
            workspace: "/src".to_string(),
            image: "img:1".to_string(),
            exec_cmd: vec!["echo".to_string(), "hi".to_string()],
            ..Default::default()
        };
        let argv = args.to_argv();
        assert_eq!(
            argv,
            vec![
                "--schema-version",
                "1",
                "--user",
                "shai",
                "--workspace",
                "/src",
                "--image",
                "img:1",
                "--exec-cmd",
                "echo",
                "--exec-cmd",
                "hi",
            ]
        );
    }

    #[test]
    fn test_full_argv_ordering_and_flags() {
        let args = BootstrapArgs {
            user: "dev".to_string(),
            workspace: "/work".to_string(),
            image: "img:2".to_string(),
            exec_env: vec!["A=1".to_string()],
            exec_cmd: vec![],
            http_allow: vec!["github.com".to_string()],
            port_allow: vec!["db.internal:5432".to_string()],
            resource_names: vec!["base".to_string(), "git".to_string()],
            root_cmds: vec!["apt-get update".to_string()],
            expose: vec!["8080:80/tcp".to_string()],
            verbose: true,
            remove_self: true,
        };
        let argv = args.to_argv();
        assert!(argv.windows(2).any(|w| w == ["--exec-env", "A=1"]));
        assert!(argv.windows(2).any(|w| w == ["--http-allow", "github.com"]));
        assert!(
            argv.windows(2)
                .any(|w| w == ["--port-allow", "db.internal:5432"])
        );
        assert!(argv.windows(2).any(|w| w == ["--resource-name", "git"]));
        assert!(
            argv.windows(2)
                .any(|w| w == ["--root-cmd", "apt-get update"])
        );
        assert!(argv.windows(2).any(|w| w == ["--expose", "8080:80/tcp"]));
        assert!(argv.contains(&"--verbose".to_string()));
        assert!(argv.windows(2).any(|w| w == ["--rm", "true"]));
        // No exec-cmd entries when the command is empty (login shell).
        assert!(!argv.contains(&"--exec-cmd".to_string()));
    }

    #[test]
    fn test_boot_script_emits_the_ready_marker() {
        // The embedded script and the detector must agree on the marker.
        assert!(BOOT_SCRIPT.contains(READY_MARKER));
    }
}
