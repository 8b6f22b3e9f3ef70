//! Policy inspection CLI commands.

use clap::Subcommand;

use crate::policy::Policy;
use crate::sandbox::host_env;

/// Starter document written by `shai policy init`. Every field a policy can
/// carry is shown, most of it commented out.
const STARTER_POLICY: &str = r#"# shai sandbox policy.
#
# Resource sets bundle permissions; apply rules activate them for workspace
# paths (a rule for "./bar" covers "bar" and everything under it).
# Template references ${{ env.X }}, ${{ vars.X }}, and ${{ conf.X }} expand
# at load time (conf provides TARGET_USER and WORKSPACE).
type: shai-sandbox
version: 1

# Container image for the sandbox. Needs tinyproxy, dnsmasq, and iptables.
image: ghcr.io/thesherwood/shai-sandbox:latest

# user: shai                      # target user inside the container
# workspace: /src                 # workspace mount point inside the container

resources:
  base: {}
  # net:
  #   http: [github.com, crates.io]       # proxy allow list (subdomains included)
  #   ports:
  #     - host: db.internal              # direct TCP egress
  #       port: 5432
  # git:
  #   vars:
  #     - GIT_AUTHOR_NAME
  #     - source: GITHUB_TOKEN
  #       target: GH_TOKEN
  #   calls:
  #     - name: push
  #       description: push the current branch
  #       command: git push origin
  #       allowed-args: "[A-Za-z0-9/_-]+"
  # web:
  #   expose:
  #     - host: 8080                      # host port -> container port
  #       container: 3000
  #   root-commands:
  #     - apt-get update

apply:
  ./: [base]
  # ./frontend:
  #   resources: [base, web]
  #   image: node:22
"#;

#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// Write a starter policy to .shai/sandbox.yaml
    Init,

    /// Load and validate the policy, reporting any errors
    Check,

    /// Print the policy after template expansion and validation
    Show,

    /// Show the resource sets and effective image for the given paths
    Resources {
        /// Workspace-relative paths (defaults to the root)
        paths: Vec<String>,
    },
}

pub async fn run_policy_command(cli: &super::Cli, command: &PolicyCommand) -> anyhow::Result<()> {
    let workdir = cli.effective_workdir()?;
    let policy_path = match &cli.policy {
        Some(path) => path.clone(),
        None => workdir
            .join(crate::policy::POLICY_DIR)
            .join(crate::policy::POLICY_FILE_NAME),
    };

    if let PolicyCommand::Init = command {
        if policy_path.exists() {
            anyhow::bail!("{} already exists", policy_path.display());
        }
        if let Some(parent) = policy_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&policy_path, STARTER_POLICY)?;
        println!("Wrote {}", policy_path.display());
        return Ok(());
    }

    let env = host_env();
    let vars = cli.parsed_vars()?;
    let load = Policy::load(&policy_path, &env, &vars)?;
    let policy = load.policy;

    match command {
        // Returned above, before the load.
        PolicyCommand::Init => {}
        PolicyCommand::Check => {
            if load.used_default {
                println!("No policy file at {}; the built-in default applies.", policy_path.display());
            } else {
                println!("Policy at {} is valid.", policy_path.display());
            }
            println!("  image:      {}", policy.image);
            println!("  user:       {}", policy.user);
            println!("  workspace:  {}", policy.workspace);
            println!("  resources:  {}", policy.resources.len());
            println!("  apply:      {} rule(s)", policy.apply.len());
        }
        PolicyCommand::Show => {
            print!("{}", policy.to_yaml());
        }
        PolicyCommand::Resources { paths } => {
            let query: Vec<String> = if paths.is_empty() {
                vec![".".to_string()]
            } else {
                paths.clone()
            };
            let selected =
                crate::sandbox::select_resources(&policy, &query, &cli.resources)?;

            println!("Paths: {}", query.join(", "));
            println!("Resource sets:");
            for resource in &selected.resources {
                let set = resource.set;
                let mut traits = Vec::new();
                if !set.http.is_empty() {
                    traits.push(format!("http:{}", set.http.len()));
                }
                if !set.calls.is_empty() {
                    traits.push(format!("calls:{}", set.calls.len()));
                }
                if !set.mounts.is_empty() {
                    traits.push(format!("mounts:{}", set.mounts.len()));
                }
                if !set.expose.is_empty() {
                    traits.push(format!("expose:{}", set.expose.len()));
                }
                if set.options.privileged {
                    traits.push("privileged".to_string());
                }
                if traits.is_empty() {
                    println!("  {}", resource.name);
                } else {
                    println!("  {} ({})", resource.name, traits.join(", "));
                }
            }
            let image = selected
                .image_override
                .as_deref()
                .unwrap_or(policy.image.as_str());
            println!("Image: {image}");
        }
    }
    Ok(())
}
