//! Cloud security-list target adapter.
//!
//! Reads and writes the source prefix of a single ingress rule in a cloud
//! security list. The rule is identified by its description label, never by
//! position: the list may contain unrelated rules that must not be touched.
//! Writes replace the whole rule collection in one call, re-fetched
//! immediately beforehand so concurrent edits to *other* rules survive.
//! A concurrent edit to the same rule is last-writer-wins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::CloudError;
use crate::exec::CommandRunner;
use crate::prefix::NetworkPrefix;

/// Deadline for one cloud CLI invocation.
const CLOUD_DEADLINE_SECS: u64 = 60;

/// One ingress rule of the security list.
///
/// Only the fields this tool reads or rewrites are typed; everything else
/// (protocol, port options, stateless flag, ...) round-trips untouched
/// through the flattened map so the whole-collection replace never mangles
/// rules it does not manage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SecurityListEnvelope {
    data: SecurityListData,
}

#[derive(Debug, Deserialize)]
struct SecurityListData {
    #[serde(rename = "ingress-security-rules")]
    ingress_security_rules: Vec<IngressRule>,
}

/// The two security-list operations consumed from the cloud API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecurityListApi: Send + Sync {
    async fn fetch_rules(&self, list_id: &str) -> Result<Vec<IngressRule>, CloudError>;
    async fn replace_rules(&self, list_id: &str, rules: &[IngressRule]) -> Result<(), CloudError>;
}

/// Real API implementation shelling out to the `oci` CLI.
///
/// Authentication is ambient (the CLI's own profile); this tool never
/// handles cloud credentials itself.
pub struct OciCliApi {
    runner: Arc<dyn CommandRunner>,
}

impl OciCliApi {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl SecurityListApi for OciCliApi {
    async fn fetch_rules(&self, list_id: &str) -> Result<Vec<IngressRule>, CloudError> {
        let args = vec![
            "network".to_string(),
            "security-list".to_string(),
            "get".to_string(),
            "--security-list-id".to_string(),
            list_id.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self
            .runner
            .run("oci", &args, Duration::from_secs(CLOUD_DEADLINE_SECS))
            .await
            .map_err(|e| CloudError::ApiFailure(e.to_string()))?;

        if !output.success {
            return Err(CloudError::ApiFailure(output.stderr.trim().to_string()));
        }

        let envelope: SecurityListEnvelope = serde_json::from_str(&output.stdout)
            .map_err(|e| CloudError::ApiFailure(format!("unexpected API response: {}", e)))?;
        Ok(envelope.data.ingress_security_rules)
    }

    async fn replace_rules(&self, list_id: &str, rules: &[IngressRule]) -> Result<(), CloudError> {
        let payload = serde_json::to_string(rules)
            .map_err(|e| CloudError::ApiFailure(format!("failed to encode rules: {}", e)))?;
        let args = vec![
            "network".to_string(),
            "security-list".to_string(),
            "update".to_string(),
            "--security-list-id".to_string(),
            list_id.to_string(),
            "--ingress-security-rules".to_string(),
            payload,
            "--force".to_string(),
        ];
        let output = self
            .runner
            .run("oci", &args, Duration::from_secs(CLOUD_DEADLINE_SECS))
            .await
            .map_err(|e| CloudError::ApiFailure(e.to_string()))?;

        if !output.success {
            return Err(CloudError::ApiFailure(output.stderr.trim().to_string()));
        }
        Ok(())
    }
}

/// Read/write interface of the cloud target, as the controller sees it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Stable identity used in the reconciliation report.
    fn identity(&self) -> String;

    /// Current source value of the managed rule.
    async fn read_current(&self) -> Result<String, CloudError>;

    /// Rewrite the managed rule's source to the given prefix.
    async fn write(&self, prefix: &NetworkPrefix) -> Result<(), CloudError>;
}

/// Cloud target bound to one security list and one rule description.
pub struct CloudTarget {
    api: Arc<dyn SecurityListApi>,
    list_id: String,
    description: String,
}

impl CloudTarget {
    pub fn new(api: Arc<dyn SecurityListApi>, list_id: String, description: String) -> Self {
        Self {
            api,
            list_id,
            description,
        }
    }

    /// Index of the single rule carrying our description.
    ///
    /// Zero matches or more than one match both refuse: the tool never
    /// guesses which rule to touch.
    fn find_rule(&self, rules: &[IngressRule]) -> Result<usize, CloudError> {
        let matches: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.description.as_deref() == Some(self.description.as_str()))
            .map(|(i, _)| i)
            .collect();

        match matches.len() {
            0 => Err(CloudError::NotFound(self.description.clone())),
            1 => Ok(matches[0]),
            n => Err(CloudError::AmbiguousMatch {
                description: self.description.clone(),
                count: n,
            }),
        }
    }
}

#[async_trait]
impl CloudAdapter for CloudTarget {
    fn identity(&self) -> String {
        format!("cloud:{}", self.description)
    }

    async fn read_current(&self) -> Result<String, CloudError> {
        let rules = self.api.fetch_rules(&self.list_id).await?;
        let idx = self.find_rule(&rules)?;
        debug!(
            "Rule '{}' currently allows {}",
            self.description, rules[idx].source
        );
        Ok(rules[idx].source.clone())
    }

    async fn write(&self, prefix: &NetworkPrefix) -> Result<(), CloudError> {
        // Re-fetch so the replace acts on the freshest collection; the gap
        // between read and decide must not clobber edits to other rules.
        let mut rules = self.api.fetch_rules(&self.list_id).await?;
        let idx = self.find_rule(&rules)?;
        rules[idx].source = prefix.to_string();
        self.api.replace_rules(&self.list_id, &rules).await?;
        info!(
            "Updated cloud rule '{}' to {}",
            self.description, prefix
        );
        Ok(())
    }
}
