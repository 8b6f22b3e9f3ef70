//! Pure assembly of the container run plan.
//!
//! Everything that can be computed without touching the Docker daemon lives
//! here: effective image and user, environment, bind list, bootstrap argv,
//! exposed ports, and flags. The supervisor turns a [`RunPlan`] into a
//! bollard container spec; tests assert on plans without a daemon. For one
//! workspace and configuration the plan is deterministic apart from the
//! staging directory path and the endpoint credentials.

use std::collections::HashMap;

use bollard::container::Config;
use bollard::models::{HostConfig, PortBinding};

use crate::alias::{ENV_ALLOW_HOST_PORT, ENV_ENDPOINT, ENV_SESSION_ID, ENV_TOKEN};
use crate::policy::Policy;
use crate::sandbox::bootstrap::{BootstrapArgs, BootstrapStage};
use crate::sandbox::config::{HOST_GATEWAY_ALIAS, SandboxConfig};
use crate::sandbox::error::Result;
use crate::sandbox::hostenv::HostIds;
use crate::sandbox::mounts::plan_mounts;
use crate::sandbox::resources::select_resources;

const ENV_DEV_UID: &str = "DEV_UID";
const ENV_DEV_GID: &str = "DEV_GID";

/// Env var boot.sh reads to enter a post-setup working directory.
const ENV_EXEC_DIR: &str = "SHAI_EXEC_DIR";

/// Endpoint coordinates folded into the plan when calls are exposed.
#[derive(Debug, Clone)]
pub struct AliasCoordinates {
    pub url: String,
    pub token: String,
    pub session_id: String,
    pub port: u16,
}

/// The fully assembled inputs for one container run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub image: String,
    pub user: String,
    pub workspace: String,
    pub resource_names: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    /// Bootstrap argv, without the entrypoint path itself.
    pub bootstrap_args: Vec<String>,
    /// (container `port/proto`, host port) publish pairs.
    pub publish: Vec<(String, u16)>,
    pub privileged: bool,
    pub use_tty: bool,
}

/// Assemble the run plan from the loaded policy and the invocation.
pub fn assemble_plan(
    config: &SandboxConfig,
    policy: &Policy,
    host_env: &HashMap<String, String>,
    ids: HostIds,
    alias: Option<&AliasCoordinates>,
    stage: &BootstrapStage,
) -> Result<RunPlan> {
    let user = config
        .user_override
        .clone()
        .unwrap_or_else(|| policy.user.clone());

    let selected = select_resources(policy, &config.rw_paths, &config.extra_resources)?;
    let resource_names: Vec<String> = selected.names().iter().map(|n| n.to_string()).collect();

    let image = config
        .image_override
        .clone()
        .or_else(|| selected.image_override.clone())
        .unwrap_or_else(|| policy.image.clone());

    let mount_plan = plan_mounts(&config.workdir, &policy.workspace, &config.rw_paths)?;
    let resource_mounts = selected.mounts(&config.workdir);

    let mut env = vec![
        format!("{ENV_DEV_UID}={}", ids.uid),
        format!("{ENV_DEV_GID}={}", ids.gid),
    ];
    for (name, value) in selected.env_mappings(host_env) {
        env.push(format!("{name}={value}"));
    }
    if let Some(alias) = alias {
        env.push(format!("{ENV_ENDPOINT}={}", alias.url));
        env.push(format!("{ENV_TOKEN}={}", alias.token));
        env.push(format!("{ENV_SESSION_ID}={}", alias.session_id));
        env.push(format!(
            "{ENV_ALLOW_HOST_PORT}={HOST_GATEWAY_ALIAS}:{}",
            alias.port
        ));
    }

    let mut exec_env = Vec::new();
    let mut exec_cmd = Vec::new();
    let use_tty = config.use_tty();
    if let Some(exec) = &config.exec {
        let mut pairs: Vec<(&String, &String)> = exec.env.iter().collect();
        pairs.sort();
        for (key, value) in pairs {
            exec_env.push(format!("{key}={value}"));
        }
        if let Some(dir) = &exec.workdir {
            exec_env.push(format!("{ENV_EXEC_DIR}={dir}"));
        }
        exec_cmd = exec.argv.clone();
    }

    let expose = selected.exposed_ports();
    let args = BootstrapArgs {
        user: user.clone(),
        workspace: policy.workspace.clone(),
        image: image.clone(),
        exec_env,
        exec_cmd,
        http_allow: selected.http_hosts(),
        // Direct (host, port) egress entries from the policy; the endpoint's
        // own gateway:port pair travels in ALLOW_DOCKER_HOST_PORT instead.
        port_allow: selected.port_allows().iter().map(|p| p.to_string()).collect(),
        resource_names: resource_names.clone(),
        root_cmds: selected.root_commands(),
        expose: expose
            .iter()
            .map(|p| format!("{}:{}/{}", p.host, p.container, p.protocol))
            .collect(),
        verbose: config.verbose,
        remove_self: true,
    };

    let mut binds: Vec<String> = mount_plan.entries.iter().map(|e| e.bind_spec()).collect();
    binds.extend(resource_mounts.iter().map(|e| e.bind_spec()));
    binds.push(stage.bind_spec());

    let publish = expose
        .iter()
        .map(|p| (format!("{}/{}", p.container, p.protocol), p.host))
        .collect();

    Ok(RunPlan {
        image,
        user,
        workspace: policy.workspace.clone(),
        resource_names,
        env,
        binds,
        bootstrap_args: args.to_argv(),
        publish,
        privileged: config.privileged || selected.privileged(),
        use_tty,
    })
}

impl RunPlan {
    /// Render the plan as a bollard container spec with the bootstrap
    /// entrypoint.
    pub fn to_container_config(&self) -> Config<String> {
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (key, host_port) in &self.publish {
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            binds: Some(self.binds.clone()),
            extra_hosts: Some(vec![format!("{HOST_GATEWAY_ALIAS}:host-gateway")]),
            // The in-container firewall needs NET_ADMIN.
            cap_add: Some(vec!["NET_ADMIN".to_string()]),
            privileged: Some(self.privileged),
            auto_remove: Some(true),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            ..Default::default()
        };

        let mut entrypoint = vec![BootstrapStage::entrypoint()];
        entrypoint.extend(self.bootstrap_args.iter().cloned());

        Config {
            image: Some(self.image.clone()),
            entrypoint: Some(entrypoint),
            // Bootstrap runs as root to erect the second isolation layer,
            // then drops to the target user.
            user: Some("root".to_string()),
            working_dir: Some(self.workspace.clone()),
            env: Some(self.env.clone()),
            attach_stdin: Some(self.use_tty),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(self.use_tty),
            open_stdin: Some(self.use_tty),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}
