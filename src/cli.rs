//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "prefixsync")]
#[command(author, version, about = "Keeps cloud and host firewalls in sync with a dynamic IPv6 prefix")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "/etc/prefixsync/config.yaml", global = true)]
    pub config: PathBuf,

    /// Quiet mode (for systemd timer runs)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install prefixsync (create config, systemd service and timer)
    Install {
        /// Timer interval between passes (e.g. 30m, 4h)
        #[arg(long)]
        interval: Option<String>,
    },

    /// Run one reconciliation pass
    Sync {
        /// Read everything, write nothing; report the would-be actions
        #[arg(long)]
        dry_run: bool,

        /// Abort remaining targets on an unresolved failure, and treat
        /// host failures as fatal (overrides the config value)
        #[arg(long)]
        strict: bool,

        /// Print the reconciliation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show discovered prefix and each target's current state (read-only)
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Uninstall prefixsync (config and systemd units)
    Uninstall,

    /// Show version
    Version,
}
