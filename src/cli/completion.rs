//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};

/// Print a completion script for `shell` to stdout.
pub fn generate_completions(shell: Shell) {
    let mut command = super::Cli::command();
    let name = command.get_name().to_string();
    generate(shell, &mut command, name, &mut std::io::stdout());
}
