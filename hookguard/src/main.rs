use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use hookguard::cli::{Cli, Commands};
use hookguard::cmd;
use hookguard::hooks::exit_code;
use hookguard::tracing_init::init_tracing;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!(args = ?std::env::args(), "hookguard started");

    match cli.command {
        Commands::Hook(hook_cmd) => {
            if let Err(e) = hook_cmd.run() {
                error!(cmd = ?hook_cmd, "Hook error: {:#}", e);
                eprintln!("hookguard: {e:#}");
                std::process::exit(exit_code::BLOCKING_ERROR);
            }
        }
        Commands::Explain { tool, input, json } => {
            if let Err(e) = cmd::explain::run(&tool, &input, json) {
                error!("Explain error: {:#}", e);
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::Risk { json } => {
            if let Err(e) = cmd::risk::run(json) {
                error!("Risk error: {:#}", e);
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
