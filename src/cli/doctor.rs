//! Doctor diagnostics CLI command.
//!
//! Checks the host for everything a sandbox run needs and reports
//! actionable fixes.

use crate::policy::Policy;
use crate::sandbox::{docker, host_env, host_ids};

/// Diagnostic check result.
struct Check {
    name: &'static str,
    status: CheckStatus,
    message: String,
    fix: Option<String>,
}

enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl Check {
    fn ok(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Ok,
            message: message.into(),
            fix: None,
        }
    }

    fn warn(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warning,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn error(name: &'static str, message: impl Into<String>, fix: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Error,
            message: message.into(),
            fix: Some(fix.into()),
        }
    }

    fn icon(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warning => "[WARN]",
            CheckStatus::Error => "[ERR]",
        }
    }
}

/// Run host diagnostics.
pub async fn run_doctor_command(cli: &super::Cli) -> anyhow::Result<()> {
    println!("shai doctor");
    println!("===========\n");

    let mut checks = Vec::new();

    checks.push(check_docker().await);
    checks.push(check_workspace(cli));
    checks.push(check_policy(cli));
    checks.push(check_identity());

    let mut failures = 0;
    for check in &checks {
        println!("{} {} - {}", check.icon(), check.name, check.message);
        if let Some(fix) = &check.fix {
            println!("     fix: {fix}");
        }
        if matches!(check.status, CheckStatus::Error) {
            failures += 1;
        }
    }

    println!();
    if failures == 0 {
        println!("All checks passed.");
        Ok(())
    } else {
        anyhow::bail!("{failures} check(s) failed")
    }
}

async fn check_docker() -> Check {
    match docker::connect().await {
        Ok(_) => Check::ok("docker", "daemon reachable"),
        Err(e) => Check::error(
            "docker",
            e.to_string(),
            "start Docker (or set DOCKER_HOST to a reachable daemon)",
        ),
    }
}

fn check_workspace(cli: &super::Cli) -> Check {
    match cli.effective_workdir() {
        Ok(dir) if dir.is_dir() => Check::ok("workspace", dir.display().to_string()),
        Ok(dir) => Check::error(
            "workspace",
            format!("{} is not a directory", dir.display()),
            "pass an existing directory with -C",
        ),
        Err(e) => Check::error("workspace", e.to_string(), "pass a directory with -C"),
    }
}

fn check_policy(cli: &super::Cli) -> Check {
    let Ok(workdir) = cli.effective_workdir() else {
        return Check::warn("policy", "workspace unavailable", "fix the workspace first");
    };
    let path = match &cli.policy {
        Some(path) => path.clone(),
        None => workdir
            .join(crate::policy::POLICY_DIR)
            .join(crate::policy::POLICY_FILE_NAME),
    };

    let env = host_env();
    let vars = cli.parsed_vars().unwrap_or_default();
    match Policy::load(&path, &env, &vars) {
        Ok(load) if load.used_default => Check::warn(
            "policy",
            format!("no policy at {}, default applies", path.display()),
            "create .shai/sandbox.yaml to declare resources",
        ),
        Ok(_) => Check::ok("policy", format!("{} is valid", path.display())),
        Err(e) => Check::error(
            "policy",
            e.to_string(),
            "fix the policy file and re-run `shai policy check`",
        ),
    }
}

fn check_identity() -> Check {
    let ids = host_ids();
    if ids.uid == crate::sandbox::ROOT_SUBSTITUTE_ID {
        Check::warn(
            "identity",
            format!("running as root, sandbox uses {}:{}", ids.uid, ids.gid),
            "prefer running shai as a regular user",
        )
    } else {
        Check::ok("identity", format!("uid {} gid {}", ids.uid, ids.gid))
    }
}
