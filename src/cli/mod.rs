pub mod app;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "schemalift")]
#[command(about = "Resumable, graph-driven database upgrades")]
pub struct Cli {
    /// Upgrade configuration file
    #[arg(long, short, default_value = "schemalift.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upgrade the database
    Upgrade {
        /// A version, a `prefix*`, or `latest`; defaults to the configured target
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        downgrade: bool,
        /// Only print the segments that would be applied
        #[arg(long)]
        dry_run: bool,
    },
    /// List versions reachable from the current one
    Targets {
        #[arg(long)]
        tips: bool,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        downgrade: bool,
    },
    /// Show the current version state
    Status,
    /// Print the upgrade log
    Log {
        #[arg(long)]
        json: bool,
    },
    /// Create or upgrade the control tables only
    Setup,
}
