use clap::Parser;
use tracing_subscriber::EnvFilter;

use shai::cli::{Cli, Command, run_doctor_command, run_policy_command, run_sandbox_command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "shai=debug" } else { "shai=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = if let Some(command) = &cli.command {
        match command {
            Command::Policy { command } => run_policy_command(&cli, command).await,
            Command::Doctor => run_doctor_command(&cli).await,
            Command::Completion { shell } => {
                shai::cli::generate_completions(*shell);
                Ok(())
            }
        }
    } else {
        run_sandbox_command(cli).await
    };

    if let Err(e) = result {
        eprintln!("shai: {e}");
        std::process::exit(1);
    }
}
