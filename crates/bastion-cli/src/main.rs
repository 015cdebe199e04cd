mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.verbose)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Synth(args) => {
            if !commands::synth::run_synth_command(&args)? {
                // Completed run without a verified certificate
                std::process::exit(2);
            }
        }
        Commands::Systems => commands::systems::run_systems_command()?,
    }
    Ok(())
}
