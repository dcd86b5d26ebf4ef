//! Installation and uninstallation of prefixsync.
//!
//! The control loop is external: a systemd timer triggers one pass at a
//! time. Install writes the config skeleton and the service/timer pair;
//! uninstall reverses it and leaves the firewall state alone (the address
//! sets keep protecting the hosts until removed by hand).

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use tracing::info;

use crate::config::Config;

const CONFIG_DIR: &str = "/etc/prefixsync";
pub const CONFIG_FILE: &str = "/etc/prefixsync/config.yaml";
const SYSTEMD_SERVICE: &str = "/etc/systemd/system/prefixsync.service";
const SYSTEMD_TIMER: &str = "/etc/systemd/system/prefixsync.timer";

/// Timer interval validation (e.g. "30m", "4h", "1d").
///
/// Requires ASCII-only input to prevent Unicode-related edge cases.
pub fn is_valid_interval(interval: &str) -> bool {
    if !interval.is_ascii() || interval.len() < 2 {
        return false;
    }

    // Safe to use chars() since we verified ASCII-only
    let suffix = interval.chars().last().unwrap();
    let num_part = &interval[..interval.len() - 1];

    matches!(suffix, 's' | 'm' | 'h' | 'd') && num_part.parse::<u32>().is_ok()
}

fn validate_interval(interval: &str) -> Result<()> {
    if !is_valid_interval(interval) {
        anyhow::bail!(
            "Invalid timer interval '{}'. Use format like '30m', '4h', '1d'",
            interval
        );
    }
    Ok(())
}

/// Install prefixsync: config skeleton, systemd service and timer.
pub fn install(interval: Option<&str>) -> Result<()> {
    let interval = interval.unwrap_or("30m");
    validate_interval(interval)?;

    if Path::new(CONFIG_FILE).exists() {
        anyhow::bail!(
            "prefixsync is already installed. Config exists at {}.\n\
             Use 'prefixsync uninstall' first if you want to reinstall.",
            CONFIG_FILE
        );
    }

    info!("Creating {}...", CONFIG_DIR);
    fs::create_dir_all(CONFIG_DIR).context("Failed to create config directory")?;
    fs::set_permissions(CONFIG_DIR, fs::Permissions::from_mode(0o700))
        .context("Failed to set config directory permissions")?;

    info!("Creating {}...", CONFIG_FILE);
    let mut config = Config::default();
    config.update_interval = interval.to_string();
    config.save(CONFIG_FILE)?;

    info!("Creating {}...", SYSTEMD_SERVICE);
    fs::write(SYSTEMD_SERVICE, generate_service_unit())
        .context("Failed to write systemd service")?;

    info!("Creating {}...", SYSTEMD_TIMER);
    fs::write(SYSTEMD_TIMER, generate_timer_unit(interval))
        .context("Failed to write systemd timer")?;

    info!("Reloading systemd...");
    Command::new("systemctl")
        .args(["daemon-reload"])
        .status()
        .context("Failed to reload systemd")?;

    info!("Enabling prefixsync.timer...");
    Command::new("systemctl")
        .args(["enable", "--now", "prefixsync.timer"])
        .status()
        .context("Failed to enable timer")?;

    println!();
    println!("[OK] Installation complete!");
    println!();
    println!("Next steps:");
    println!("  1. Edit configuration: {}", CONFIG_FILE);
    println!("  2. Test without writing: prefixsync sync --dry-run");
    println!("  3. Check convergence: prefixsync status");
    println!();

    Ok(())
}

/// Uninstall prefixsync.
pub fn uninstall() -> Result<()> {
    info!("Uninstalling prefixsync...");

    let _ = Command::new("systemctl")
        .args(["stop", "prefixsync.timer"])
        .status();
    let _ = Command::new("systemctl")
        .args(["disable", "prefixsync.timer"])
        .status();

    if Path::new(SYSTEMD_SERVICE).exists() {
        info!("Removing {}...", SYSTEMD_SERVICE);
        fs::remove_file(SYSTEMD_SERVICE)?;
    }
    if Path::new(SYSTEMD_TIMER).exists() {
        info!("Removing {}...", SYSTEMD_TIMER);
        fs::remove_file(SYSTEMD_TIMER)?;
    }

    let _ = Command::new("systemctl")
        .args(["daemon-reload"])
        .status();

    if Path::new(CONFIG_DIR).exists() {
        info!("Removing {}...", CONFIG_DIR);
        fs::remove_dir_all(CONFIG_DIR)?;
    }

    println!();
    println!("[OK] prefixsync uninstalled.");
    println!();
    println!("Note: cloud rules and host address-sets were left in place.");
    println!("      The binary at /usr/local/bin/prefixsync was not removed.");
    println!();

    Ok(())
}

/// Check if prefixsync is installed.
pub fn is_installed() -> bool {
    Path::new(CONFIG_FILE).exists()
}

/// Generate systemd service unit.
fn generate_service_unit() -> String {
    r#"[Unit]
Description=prefixsync IPv6 prefix reconciliation
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
ExecStart=/usr/local/bin/prefixsync sync --quiet

# The pass needs firewall control locally plus outbound ssh and the cloud
# CLI's ambient credentials, so sandboxing stays conservative.
NoNewPrivileges=yes
PrivateTmp=yes

[Install]
WantedBy=multi-user.target
"#
    .to_string()
}

/// Generate systemd timer unit.
fn generate_timer_unit(interval: &str) -> String {
    format!(
        r#"[Unit]
Description=prefixsync periodic reconciliation

[Timer]
OnBootSec=2min
OnUnitActiveSec={}
Persistent=true

[Install]
WantedBy=timers.target
"#,
        interval
    )
}
