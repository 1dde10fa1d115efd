//! CLI surface (ADDED, spec §6) — subcommand definitions, mirrored on the
//! teacher's clap-derive `Config`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "surek")]
#[command(version, about = "Deploys and manages Docker Compose stacks behind a shared reverse proxy", long_about = None)]
pub struct Cli {
    /// Path to surek.yml. Defaults to ./surek.yml, then ./surek.yaml, in the
    /// current directory.
    #[arg(long, env = "SUREK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Acquire source, write the patched compose file, and start a stack
    Deploy {
        /// Stack name (omit with --system)
        stack: Option<String>,
        /// Deploy the bundled system stack instead
        #[arg(long)]
        system: bool,
        /// Force a fresh pull of all images
        #[arg(long)]
        pull: bool,
    },
    /// Start an already-deployed stack
    Start {
        stack: String,
        #[arg(long)]
        pull: bool,
    },
    /// Stop a stack's containers without tearing down its data
    Stop { stack: String },
    /// Stop a stack and remove its project and volume directories
    Reset { stack: String },
    /// Report the running status of a stack's containers
    Status {
        stack: String,
        /// Include per-container CPU/memory stats
        #[arg(long)]
        stats: bool,
        /// Print machine-readable JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },
    /// List all discovered stacks and whether they're deployable
    List,
    /// Backup operations against the configured S3-compatible store
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// List available backups, most recent first
    List,
    /// Trigger an immediate manual backup
    Run,
    /// Restore a backup, optionally scoped to one stack or volume
    Restore {
        /// Backup object key (as shown by `surek backup list`)
        id: String,
        /// Restore only this stack's volumes
        #[arg(long)]
        stack: Option<String>,
        /// Restore only this volume (requires --stack)
        #[arg(long)]
        volume: Option<String>,
    },
    /// Show recent backup failures
    Failures {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
