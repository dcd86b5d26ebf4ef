//! Error types for prefixsync.
//!
//! Each target kind has its own error enum so the controller can apply the
//! propagation rules that differ between them: discovery failures abort the
//! pass, cloud failures abort only in strict mode, host failures are always
//! recorded per-target.

use thiserror::Error;

/// Errors from the prefix discovery step.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("router unreachable: {0}")]
    Unreachable(String),

    #[error("no prefix-shaped token found in router output")]
    Unparseable,

    #[error("discovered prefix length /{actual} does not match expected /{expected}")]
    WrongLength { expected: u8, actual: u8 },
}

/// Errors from the cloud security-list adapter.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("no ingress rule with description '{0}'")]
    NotFound(String),

    #[error("{count} ingress rules share description '{description}', refusing to guess")]
    AmbiguousMatch { description: String, count: usize },

    #[error("cloud API failure: {0}")]
    ApiFailure(String),
}

/// Errors from the host firewall adapter.
///
/// `ReloadFailed` is kept separate from `WriteFailure` because it means the
/// new rules are staged in the permanent configuration but not yet enforced.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("host lacks required capability: {0}")]
    MissingCapability(String),

    #[error("firewall write failed: {0}")]
    WriteFailure(String),

    #[error("firewall reload failed, staged rules are not enforced: {0}")]
    ReloadFailed(String),
}
