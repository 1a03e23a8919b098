use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about = "Pack a folder into size-bounded batches and upload them", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload every pending batch, resuming an interrupted run
    Run {
        /// Folder to back up, overriding `root_path`
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print the stored progress record
    Status {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Forget stored progress so the next run starts at batch 0
    Reset {
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

impl Command {
    pub fn root(&self) -> Option<&PathBuf> {
        match self {
            Command::Run { root } | Command::Status { root } | Command::Reset { root } => {
                root.as_ref()
            }
        }
    }
}
