//! Uninstall command implementation.

use anyhow::Result;

use crate::hostfw::check_root;
use crate::installer;

/// Run the uninstall command.
pub async fn run() -> Result<()> {
    check_root()?;
    if !installer::is_installed() {
        anyhow::bail!("prefixsync is not installed (no {})", installer::CONFIG_FILE);
    }
    installer::uninstall()
}
