//! batchvault command-line entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries progress and status output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_file = app::config_file(cli.config.as_deref());
    let config = config::Config::load(&config_file)?;
    tracing::debug!(path = %config_file.display(), "configuration loaded");

    let paths = app::Paths::resolve(&config, config_file, cli.command.root())?;

    match cli.command {
        Command::Run { .. } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(app::run(config, paths))?;
        }
        Command::Status { .. } => println!("{}", app::status(&config, &paths)?),
        Command::Reset { .. } => {
            if app::reset(&config, &paths)? {
                println!("progress cleared for {}", paths.root.display());
            } else {
                println!("nothing to clear for {}", paths.root.display());
            }
        }
    }

    Ok(())
}
