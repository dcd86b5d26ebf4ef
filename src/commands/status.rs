//! Status command implementation: read-only health view.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::reconcile::TargetState;

/// Run the status command.
pub async fn run(json: bool, config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let reconciler = super::build_reconciler(&config, config.strict)?;
    let status = reconciler.inspect().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    match (&status.prefix, &status.prefix_error) {
        (Some(prefix), _) => println!("Discovered prefix: {}", prefix),
        (None, Some(err)) => println!("Discovered prefix: unavailable ({})", err),
        (None, None) => println!("Discovered prefix: unavailable"),
    }
    println!();
    print_state(&status.cloud);
    for host in &status.hosts {
        print_state(host);
    }
    println!();

    Ok(())
}

fn print_state(state: &TargetState) {
    let sync_marker = match state.in_sync {
        Some(true) => "[in sync]    ",
        Some(false) => "[out of sync]",
        None => "[unknown]    ",
    };
    let detail = match (&state.value, &state.error) {
        (_, Some(err)) => err.clone(),
        (Some(value), None) => value.clone(),
        (None, None) => "(empty)".to_string(),
    };
    println!("  {:<28} {} {}", state.target, sync_marker, detail);
}
