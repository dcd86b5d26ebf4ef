//! Host firewall target adapter (firewalld).
//!
//! Each host carries a named IPv6 address-set referenced by a permanent rich
//! rule in one zone; the rule stays static while set membership tracks the
//! prefix. Membership is reconciled by diff (remove stale entries, add the
//! missing one) so repeated prefix changes never accumulate garbage.
//!
//! The same read/create/reconcile/reload procedure exists twice: as direct
//! `firewall-cmd` invocations for the local machine, and rendered into a
//! single self-contained shell payload shipped over SSH for remote hosts,
//! so the whole sequence runs in one remote session instead of N round trips.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::HostError;
use crate::exec::CommandRunner;
use crate::prefix::NetworkPrefix;
use crate::remote::{is_valid_endpoint, SshChannel, SSH_CONNECT_FAILURE};

/// Deadline for one firewall-cmd invocation or one remote payload run.
const HOST_DEADLINE_SECS: u64 = 30;

/// Payload exit codes, chosen above the range firewall-cmd itself uses.
const EXIT_MISSING_CAPABILITY: i32 = 41;
const EXIT_RELOAD_FAILED: i32 = 42;
const EXIT_WRITE_FAILED: i32 = 43;

/// A reconciliation target host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostRef {
    /// The machine running the pass.
    Local,
    /// A `user@host` endpoint reached over SSH.
    Remote(String),
}

impl FromStr for HostRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local" | "localhost" => Ok(Self::Local),
            endpoint if is_valid_endpoint(endpoint) => Ok(Self::Remote(endpoint.to_string())),
            other => anyhow::bail!("invalid host reference: '{}'", other),
        }
    }
}

impl fmt::Display for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(endpoint) => f.write_str(endpoint),
        }
    }
}

/// Check if running as root (effective UID == 0).
///
/// Manipulating the local firewall requires it; remote hosts authorize via
/// their own SSH identity instead.
pub fn check_root() -> anyhow::Result<()> {
    // SAFETY: geteuid() reads the effective user ID, has no preconditions,
    // never fails, and modifies no state.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        anyhow::bail!("This operation requires root privileges. Please run with sudo.")
    }
    Ok(())
}

/// Validate a firewalld object name (ipset or zone) for safe command and
/// payload inclusion.
pub fn is_valid_fw_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Conservative charset check for values interpolated into the payload.
/// `Ipv6Net::to_string()` output is already within this set; the check is
/// what makes that assumption enforced rather than assumed.
fn is_safe_shell_value(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '/')
}

/// Render the remote reconciliation payload.
///
/// The payload is a pure function of (set, zone, prefix): create the ipset
/// and zone rule if absent, drop every stale entry, add the prefix if
/// missing, then reload. Distinct exit codes let the caller tell a reload
/// failure (staged but unenforced) from a write failure.
pub fn build_payload(set_name: &str, zone: &str, prefix: &NetworkPrefix) -> String {
    format!(
        r#"set -u
SET='{set}'
ZONE='{zone}'
PREFIX='{prefix}'
command -v firewall-cmd >/dev/null 2>&1 || exit {missing}
firewall-cmd --permanent --get-ipsets 2>/dev/null | tr ' ' '\n' | grep -qx "$SET" || \
  firewall-cmd --permanent --new-ipset="$SET" --type=hash:net --option=family=inet6 >/dev/null || exit {write}
RULE="rule family=\"ipv6\" source ipset=\"$SET\" accept"
firewall-cmd --permanent --zone="$ZONE" --query-rich-rule="$RULE" >/dev/null 2>&1 || \
  firewall-cmd --permanent --zone="$ZONE" --add-rich-rule="$RULE" >/dev/null || exit {write}
for entry in $(firewall-cmd --permanent --ipset="$SET" --get-entries 2>/dev/null); do
  [ "$entry" = "$PREFIX" ] || firewall-cmd --permanent --ipset="$SET" --remove-entry="$entry" >/dev/null || exit {write}
done
firewall-cmd --permanent --ipset="$SET" --query-entry="$PREFIX" >/dev/null 2>&1 || \
  firewall-cmd --permanent --ipset="$SET" --add-entry="$PREFIX" >/dev/null || exit {write}
firewall-cmd --reload >/dev/null || exit {reload}
"#,
        set = set_name,
        zone = zone,
        prefix = prefix,
        missing = EXIT_MISSING_CAPABILITY,
        write = EXIT_WRITE_FAILED,
        reload = EXIT_RELOAD_FAILED,
    )
}

/// Read/write interface of a host firewall, as the controller sees it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostFirewall: Send + Sync {
    /// Current entries of the address-set (empty if the set does not exist).
    async fn read_entries(&self, host: &HostRef) -> Result<Vec<String>, HostError>;

    /// Reconcile the set to exactly `{prefix}` and reload.
    async fn apply(&self, host: &HostRef, prefix: &NetworkPrefix) -> Result<(), HostError>;
}

/// firewalld-backed implementation.
pub struct FirewalldAdapter {
    runner: Arc<dyn CommandRunner>,
    channel: SshChannel,
    set_name: String,
    zone: String,
}

impl FirewalldAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>, set_name: String, zone: String) -> Self {
        let channel = SshChannel::new(Arc::clone(&runner));
        Self {
            runner,
            channel,
            set_name,
            zone,
        }
    }

    fn deadline() -> Duration {
        Duration::from_secs(HOST_DEADLINE_SECS)
    }

    /// Run firewall-cmd locally, mapping spawn failure to a capability error.
    async fn fw_cmd(&self, args: &[&str]) -> Result<crate::exec::CommandOutput, HostError> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.runner
            .run("firewall-cmd", &args, Self::deadline())
            .await
            .map_err(|e| HostError::MissingCapability(e.to_string()))
    }

    fn rich_rule(&self) -> String {
        format!(
            "rule family=\"ipv6\" source ipset=\"{}\" accept",
            self.set_name
        )
    }

    async fn local_read(&self) -> Result<Vec<String>, HostError> {
        let ipsets = self.fw_cmd(&["--permanent", "--get-ipsets"]).await?;
        if !ipsets.success {
            return Err(HostError::MissingCapability(
                ipsets.stderr.trim().to_string(),
            ));
        }
        if !ipsets
            .stdout
            .split_whitespace()
            .any(|s| s == self.set_name)
        {
            return Ok(Vec::new());
        }

        let ipset_arg = format!("--ipset={}", self.set_name);
        let entries = self
            .fw_cmd(&["--permanent", &ipset_arg, "--get-entries"])
            .await?;
        if !entries.success {
            return Err(HostError::WriteFailure(entries.stderr.trim().to_string()));
        }
        Ok(entries
            .stdout
            .split_whitespace()
            .map(|s| s.to_string())
            .collect())
    }

    async fn local_apply(&self, prefix: &NetworkPrefix) -> Result<(), HostError> {
        let ipset_arg = format!("--ipset={}", self.set_name);
        let zone_arg = format!("--zone={}", self.zone);
        let rule = self.rich_rule();

        // Create the set if absent.
        let ipsets = self.fw_cmd(&["--permanent", "--get-ipsets"]).await?;
        if !ipsets.success {
            return Err(HostError::MissingCapability(
                ipsets.stderr.trim().to_string(),
            ));
        }
        if !ipsets
            .stdout
            .split_whitespace()
            .any(|s| s == self.set_name)
        {
            let new_ipset = format!("--new-ipset={}", self.set_name);
            let created = self
                .fw_cmd(&[
                    "--permanent",
                    &new_ipset,
                    "--type=hash:net",
                    "--option=family=inet6",
                ])
                .await?;
            if !created.success {
                return Err(HostError::WriteFailure(created.stderr.trim().to_string()));
            }
            debug!("Created ipset {}", self.set_name);
        }

        // Ensure the zone rule references the set.
        let query_rule = format!("--query-rich-rule={}", rule);
        let has_rule = self
            .fw_cmd(&["--permanent", &zone_arg, &query_rule])
            .await?;
        if !has_rule.success {
            let add_rule = format!("--add-rich-rule={}", rule);
            let added = self.fw_cmd(&["--permanent", &zone_arg, &add_rule]).await?;
            if !added.success {
                return Err(HostError::WriteFailure(added.stderr.trim().to_string()));
            }
            debug!("Added rich rule to zone {}", self.zone);
        }

        // Reconcile membership to exactly {prefix}.
        let entries = self
            .fw_cmd(&["--permanent", &ipset_arg, "--get-entries"])
            .await?;
        if !entries.success {
            return Err(HostError::WriteFailure(entries.stderr.trim().to_string()));
        }
        let mut present = false;
        for entry in entries.stdout.split_whitespace() {
            if prefix.matches_str(entry) {
                present = true;
                continue;
            }
            let remove = format!("--remove-entry={}", entry);
            let removed = self.fw_cmd(&["--permanent", &ipset_arg, &remove]).await?;
            if !removed.success {
                return Err(HostError::WriteFailure(removed.stderr.trim().to_string()));
            }
            info!("Removed stale entry {} from {}", entry, self.set_name);
        }
        if !present {
            let add = format!("--add-entry={}", prefix);
            let added = self.fw_cmd(&["--permanent", &ipset_arg, &add]).await?;
            if !added.success {
                return Err(HostError::WriteFailure(added.stderr.trim().to_string()));
            }
        }

        // Apply the staged configuration.
        let reloaded = self.fw_cmd(&["--reload"]).await?;
        if !reloaded.success {
            return Err(HostError::ReloadFailed(reloaded.stderr.trim().to_string()));
        }
        info!("Local firewall reconciled to {}", prefix);
        Ok(())
    }

    async fn remote_read(&self, endpoint: &str) -> Result<Vec<String>, HostError> {
        let command = format!(
            "firewall-cmd --permanent --ipset={} --get-entries",
            self.set_name
        );
        let output = self
            .channel
            .run(endpoint, &command, Self::deadline())
            .await
            .map_err(|e| HostError::Unreachable(e.to_string()))?;

        if output.code == Some(SSH_CONNECT_FAILURE) {
            return Err(HostError::Unreachable(output.stderr.trim().to_string()));
        }
        if !output.success {
            let stderr = output.stderr.trim();
            if stderr.contains("not found") || output.code == Some(127) {
                return Err(HostError::MissingCapability(stderr.to_string()));
            }
            // firewalld reports a nonexistent ipset as INVALID_IPSET; for
            // the read side that simply means no entries yet.
            if stderr.contains("INVALID_IPSET") {
                return Ok(Vec::new());
            }
            return Err(HostError::WriteFailure(stderr.to_string()));
        }
        Ok(output
            .stdout
            .split_whitespace()
            .map(|s| s.to_string())
            .collect())
    }

    async fn remote_apply(&self, endpoint: &str, prefix: &NetworkPrefix) -> Result<(), HostError> {
        // Ipv6Net renders within this charset already; the guard makes that
        // an enforced invariant before anything reaches a remote shell.
        let rendered = prefix.to_string();
        if !is_safe_shell_value(&rendered) {
            return Err(HostError::WriteFailure(format!(
                "refusing to ship unsafe prefix rendering: {}",
                rendered
            )));
        }

        let payload = build_payload(&self.set_name, &self.zone, prefix);
        let output = self
            .channel
            .run_script(endpoint, &payload, Self::deadline())
            .await
            .map_err(|e| HostError::Unreachable(e.to_string()))?;

        match output.code {
            Some(0) => {
                info!("Host {} reconciled to {}", endpoint, prefix);
                Ok(())
            }
            Some(SSH_CONNECT_FAILURE) => {
                Err(HostError::Unreachable(output.stderr.trim().to_string()))
            }
            Some(EXIT_MISSING_CAPABILITY) => Err(HostError::MissingCapability(
                "firewall-cmd not found on host".to_string(),
            )),
            Some(EXIT_RELOAD_FAILED) => {
                Err(HostError::ReloadFailed(output.stderr.trim().to_string()))
            }
            _ => Err(HostError::WriteFailure(output.stderr.trim().to_string())),
        }
    }
}

#[async_trait]
impl HostFirewall for FirewalldAdapter {
    async fn read_entries(&self, host: &HostRef) -> Result<Vec<String>, HostError> {
        match host {
            HostRef::Local => self.local_read().await,
            HostRef::Remote(endpoint) => self.remote_read(endpoint).await,
        }
    }

    async fn apply(&self, host: &HostRef, prefix: &NetworkPrefix) -> Result<(), HostError> {
        match host {
            HostRef::Local => self.local_apply(prefix).await,
            HostRef::Remote(endpoint) => self.remote_apply(endpoint, prefix).await,
        }
    }
}
