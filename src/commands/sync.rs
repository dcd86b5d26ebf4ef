//! Sync command implementation: one reconciliation pass.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::hostfw::{check_root, HostRef};
use crate::lock::PassGuard;
use crate::reconcile::{PassOutcome, TargetAction};

/// Run the sync command.
pub async fn run(dry_run: bool, strict: bool, json: bool, config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let strict = strict || config.strict;

    // Mutating the local firewall needs root; a host list without "local"
    // only talks to remote endpoints and the cloud CLI.
    if !dry_run && config.host_refs()?.contains(&HostRef::Local) {
        check_root()?;
    }

    // One pass at a time; timer runs and ad-hoc invocations must not overlap.
    let _guard = PassGuard::acquire()?;

    let reconciler = super::build_reconciler(&config, strict)?;

    if dry_run {
        info!("Dry-run: reads only, no target will be written");
    }
    let report = reconciler.run_pass(dry_run).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "Discovered prefix: {}{}",
            report.prefix,
            if report.dry_run { " (dry-run)" } else { "" }
        );
        print_outcome(&report.cloud);
        for host in &report.hosts {
            print_outcome(host);
        }
        println!();
        if report.success {
            println!("[OK] All targets accounted for");
        } else {
            println!("[FAILED] One or more targets did not converge");
        }
    }

    if !report.success {
        anyhow::bail!("reconciliation pass finished with failures");
    }
    Ok(())
}

fn print_outcome(outcome: &PassOutcome) {
    let action = match outcome.action {
        TargetAction::NoOp => "no-op  ",
        TargetAction::Updated => "updated",
        TargetAction::Failed => "failed ",
    };
    let detail = match outcome.action {
        TargetAction::Failed => outcome.error.clone().unwrap_or_default(),
        _ => match (&outcome.previous, &outcome.new) {
            (Some(prev), Some(new)) if prev != new => format!("{} -> {}", prev, new),
            (_, Some(new)) => new.clone(),
            _ => String::new(),
        },
    };
    println!("  {:<28} {} {}", outcome.target, action, detail);
}
