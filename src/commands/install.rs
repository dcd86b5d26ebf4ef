//! Install command implementation.

use anyhow::Result;

use crate::hostfw::check_root;
use crate::installer;

/// Run the install command.
pub async fn run(interval: Option<String>) -> Result<()> {
    check_root()?;
    installer::install(interval.as_deref())
}
