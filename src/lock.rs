//! File-based locking to prevent overlapping passes.
//!
//! A pass is not re-entrant: the controller assumes at most one active pass
//! per machine. Advisory flock-style locking enforces that across ad-hoc
//! invocations and timer runs.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const LOCK_FILE: &str = "/var/run/prefixsync.lock";

/// A guard holding an exclusive lock for the duration of one pass.
/// The lock is automatically released when the guard is dropped.
pub struct PassGuard {
    _file: File,
}

impl PassGuard {
    /// Attempt to acquire the pass lock.
    /// Returns an error if another pass is already in flight.
    ///
    /// Uses OpenOptions with create+read+write to avoid a TOCTOU race
    /// between file creation and lock acquisition.
    pub fn acquire() -> Result<Self> {
        let lock_path = Path::new(LOCK_FILE);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).ok(); // /var/run should exist, but just in case
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {}", LOCK_FILE))?;

        fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another reconciliation pass is already running.\n\
                 Wait for it to complete, or remove the lock file if it is stale: {}",
                LOCK_FILE
            )
        })?;

        Ok(Self { _file: file })
    }
}

// Lock is automatically released when the file is closed (on drop)

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_acquire_release() {
        // Writing to /var/run needs root, so just verify the API shape.
        let _guard_type: fn() -> Result<PassGuard> = PassGuard::acquire;
    }
}
