//! Prefix discovery against the upstream router.
//!
//! Runs a read-only introspection command on the router over the SSH channel
//! and extracts the currently advertised prefix from its output. Discovery is
//! the gate for the whole pass: no target is ever mutated without a validated
//! prefix.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::DiscoveryError;
use crate::prefix::{extract_prefix, NetworkPrefix};
use crate::remote::{SshChannel, COMMAND_DEADLINE_SECS};

/// Source of the currently advertised network prefix.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PrefixSource: Send + Sync {
    async fn discover(&self) -> Result<NetworkPrefix, DiscoveryError>;
}

/// Discovers the prefix by interrogating the upstream router over SSH.
pub struct RouterPrefixSource {
    channel: SshChannel,
    endpoint: String,
    command: String,
    keyword: String,
    expected_len: u8,
}

impl RouterPrefixSource {
    pub fn new(
        channel: SshChannel,
        endpoint: String,
        command: String,
        keyword: String,
        expected_len: u8,
    ) -> Self {
        Self {
            channel,
            endpoint,
            command,
            keyword,
            expected_len,
        }
    }
}

#[async_trait]
impl PrefixSource for RouterPrefixSource {
    async fn discover(&self) -> Result<NetworkPrefix, DiscoveryError> {
        debug!("Querying {} with '{}'", self.endpoint, self.command);

        let output = self
            .channel
            .run(
                &self.endpoint,
                &self.command,
                Duration::from_secs(COMMAND_DEADLINE_SECS),
            )
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        if !output.success {
            return Err(DiscoveryError::Unreachable(
                output.stderr.trim().to_string(),
            ));
        }

        let prefix = extract_prefix(&output.stdout, &self.keyword, self.expected_len)?;
        info!("Discovered prefix {}", prefix);
        Ok(prefix)
    }
}
