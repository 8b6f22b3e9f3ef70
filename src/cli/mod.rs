//! CLI command handling.
//!
//! Provides:
//! - Running a sandbox (default, with an optional trailing command)
//! - Policy management (`policy init`, `policy check`, `policy resources`)
//! - Host diagnostics (`doctor`)
//! - Shell completion generation (`completion`)

mod completion;
mod doctor;
mod policy;

pub use completion::generate_completions;
pub use doctor::run_doctor_command;
pub use policy::{PolicyCommand, run_policy_command};

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::sandbox::{PostSetupExec, Sandbox, SandboxConfig};
use crate::util::split_key_value;

#[derive(Parser, Debug)]
#[command(name = "shai")]
#[command(about = "Run command-line AI coding agents in ephemeral, network-restricted sandboxes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Workspace directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Policy file (defaults to <workdir>/.shai/sandbox.yaml)
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    /// Verbose diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Mount a workspace subpath read-write (repeatable; "." for the root)
    #[arg(long = "rw", value_name = "PATH")]
    pub rw: Vec<String>,

    /// Activate an extra resource set (repeatable)
    #[arg(long = "resource", value_name = "NAME")]
    pub resources: Vec<String>,

    /// Template variable for ${{ vars.X }} references (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Override the container image
    #[arg(long)]
    pub image: Option<String>,

    /// Override the target user name
    #[arg(long)]
    pub user: Option<String>,

    /// Run the container privileged
    #[arg(long)]
    pub privileged: bool,

    /// Command to run inside the sandbox instead of an interactive shell
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub exec: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate and inspect the workspace policy
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },

    /// Check the host for sandbox prerequisites
    Doctor,

    /// Generate a shell completion script
    Completion {
        /// Shell flavor
        shell: clap_complete::Shell,
    },
}

impl Cli {
    pub fn effective_workdir(&self) -> anyhow::Result<PathBuf> {
        match &self.workdir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn parsed_vars(&self) -> anyhow::Result<HashMap<String, String>> {
        parse_vars(&self.vars)
    }
}

fn parse_vars(entries: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for entry in entries {
        let (key, value) = split_key_value(entry)
            .ok_or_else(|| anyhow::anyhow!("--var expects KEY=VALUE, got {entry:?}"))?;
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Run a sandbox per the CLI flags (the default command).
pub async fn run_sandbox_command(cli: Cli) -> anyhow::Result<()> {
    use std::io::IsTerminal;

    let workdir = cli.effective_workdir()?;
    let mut config = SandboxConfig::new(workdir)
        .rw_paths(cli.rw.clone())
        .extra_resources(cli.resources.clone())
        .template_vars(cli.parsed_vars()?)
        .verbose(cli.verbose)
        .privileged(cli.privileged);

    if let Some(path) = &cli.policy {
        config = config.policy_path(path.clone());
    }
    if let Some(image) = &cli.image {
        config = config.image(image.clone());
    }
    if let Some(user) = &cli.user {
        config = config.user(user.clone());
    }
    if !cli.exec.is_empty() {
        config = config.exec(PostSetupExec {
            argv: cli.exec.clone(),
            env: HashMap::new(),
            workdir: None,
            use_tty: std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
        });
    }

    Sandbox::new(config).run().await?;
    Ok(())
}
