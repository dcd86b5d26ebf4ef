//! prefixsync - keeps cloud and host firewalls in sync with a dynamic
//! IPv6 prefix advertised by the upstream router.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use prefixsync::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Execute command
    match cli.command {
        Commands::Install { interval } => prefixsync::commands::install::run(interval).await,
        Commands::Sync {
            dry_run,
            strict,
            json,
        } => prefixsync::commands::sync::run(dry_run, strict, json, &cli.config).await,
        Commands::Status { json } => prefixsync::commands::status::run(json, &cli.config).await,
        Commands::Uninstall => prefixsync::commands::uninstall::run().await,
        Commands::Version => {
            println!("prefixsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
