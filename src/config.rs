//! Configuration management for prefixsync.
//!
//! The configuration is read once at pass start into an immutable value and
//! threaded through every component; there is no ambient or global state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::hostfw::{is_valid_fw_name, HostRef};
use crate::remote::is_valid_endpoint;

/// Default expected prefix length.
const DEFAULT_PREFIX_LENGTH: u8 = 64;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cloud security-list target
    pub cloud: CloudConfig,

    /// Upstream router used for prefix discovery
    pub router: RouterConfig,

    /// Expected prefix length; anything else fails discovery validation
    pub prefix_length: u8,

    /// Host firewall target parameters (shared by all hosts)
    pub firewall: FirewallConfig,

    /// Hosts to reconcile: "local" or "user@host"
    pub hosts: Vec<String>,

    /// Strict mode: unresolved failures abort the remainder of a pass
    pub strict: bool,

    /// Attempt SELinux denial remediation after adapter failures
    pub remediation: bool,

    /// Update interval for the systemd timer
    pub update_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// OCID of the security list holding the managed rule
    pub security_list_id: String,

    /// Description label identifying the single rule to manage
    pub rule_description: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            security_list_id: String::new(),
            rule_description: "ALLOW_HOME_NETWORK".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// SSH endpoint of the upstream router
    pub endpoint: String,

    /// Read-only command whose output contains the advertised prefix
    pub discovery_command: String,

    /// Keyword anchoring the first extraction pass
    pub keyword: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            endpoint: "root@192.168.1.1".to_string(),
            discovery_command: "ip -6 addr show dev br-lan scope global".to_string(),
            keyword: "inet6".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Name of the IPv6 address-set holding the prefix
    pub set_name: String,

    /// Zone whose policy rule references the set
    pub zone: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            set_name: "home-prefix6".to_string(),
            zone: "public".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud: CloudConfig::default(),
            router: RouterConfig::default(),
            prefix_length: DEFAULT_PREFIX_LENGTH,
            firewall: FirewallConfig::default(),
            hosts: vec!["local".to_string()],
            strict: false,
            remediation: true,
            update_interval: "30m".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.prefix_length == 0 || self.prefix_length > 128 {
            anyhow::bail!(
                "Invalid prefix_length {}. Must be between 1 and 128",
                self.prefix_length
            );
        }

        if !is_valid_endpoint(&self.router.endpoint) {
            anyhow::bail!("Invalid router endpoint '{}'", self.router.endpoint);
        }

        if self.router.discovery_command.trim().is_empty() {
            anyhow::bail!("router.discovery_command cannot be empty");
        }

        if !is_valid_fw_name(&self.firewall.set_name) {
            anyhow::bail!("Invalid firewall set_name '{}'", self.firewall.set_name);
        }
        if !is_valid_fw_name(&self.firewall.zone) {
            anyhow::bail!("Invalid firewall zone '{}'", self.firewall.zone);
        }

        for host in &self.hosts {
            host.parse::<HostRef>()
                .with_context(|| format!("Invalid host entry '{}'", host))?;
        }

        if self.cloud.rule_description.trim().is_empty() {
            anyhow::bail!("cloud.rule_description cannot be empty");
        }

        if !crate::installer::is_valid_interval(&self.update_interval) {
            anyhow::bail!(
                "Invalid update_interval '{}'. Use format like '30m', '4h', '1d'",
                self.update_interval
            );
        }

        Ok(())
    }

    /// Parsed host references.
    pub fn host_refs(&self) -> Result<Vec<HostRef>> {
        self.hosts.iter().map(|h| h.parse()).collect()
    }

    /// Save configuration to YAML file atomically with owner-only access.
    ///
    /// The config carries identifiers with operational significance
    /// (security-list OCID, endpoints), so it is never world-readable.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        let parent_dir = path.parent().unwrap_or(Path::new("/etc/prefixsync"));
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;
        temp_file
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .context("Failed to set config permissions")?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }
}
