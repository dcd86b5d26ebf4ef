//! Reconciliation controller.
//!
//! Drives one pass: discover the prefix, compare it against the cloud rule
//! and every host address-set, mutate only where the freshly-read state
//! differs, and aggregate per-target outcomes into a report. A pass never
//! writes to a target it has not just read, and an abort (failed discovery,
//! or failed cloud update in strict mode) issues no further writes.
//!
//! Passes are not re-entrant; the caller prevents overlap with the pass
//! lock. There is no rollback: every step is idempotent, so the recovery
//! path for a partial pass is simply the next pass.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cloud::CloudAdapter;
use crate::discovery::PrefixSource;
use crate::hostfw::{HostFirewall, HostRef};
use crate::policy::PolicyMonitor;
use crate::prefix::NetworkPrefix;

/// Host updates are independent of each other; bound the fan-out so a
/// large host list cannot exhaust SSH connections.
const MAX_CONCURRENT_HOSTS: usize = 4;

/// What happened to one target during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetAction {
    NoOp,
    Updated,
    Failed,
}

/// Per-target record of one pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub target: String,
    /// Value read before deciding; absent if unreadable or empty.
    pub previous: Option<String>,
    /// Value the target was (or would be, in dry-run) converged to.
    pub new: Option<String>,
    pub action: TargetAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassOutcome {
    fn failed(target: String, previous: Option<String>, error: String) -> Self {
        Self {
            target,
            previous,
            new: None,
            action: TargetAction::Failed,
            error: Some(error),
        }
    }
}

/// Aggregated result of one reconciliation pass.
///
/// Every configured target appears exactly once, even when the pass
/// aborted early, so callers can always see which of the N+1 targets
/// converged.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub prefix: String,
    pub dry_run: bool,
    pub cloud: PassOutcome,
    pub hosts: Vec<PassOutcome>,
    pub success: bool,
}

/// Read-only view of one target for the status command.
#[derive(Debug, Clone, Serialize)]
pub struct TargetState {
    pub target: String,
    pub value: Option<String>,
    /// Only present when discovery succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only view of the whole system for the status command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_error: Option<String>,
    pub cloud: TargetState,
    pub hosts: Vec<TargetState>,
}

/// One-pass reconciliation engine over a fixed set of targets.
pub struct Reconciler {
    source: Arc<dyn PrefixSource>,
    cloud: Arc<dyn CloudAdapter>,
    hostfw: Arc<dyn HostFirewall>,
    hosts: Vec<HostRef>,
    monitor: Option<Arc<PolicyMonitor>>,
    strict: bool,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn PrefixSource>,
        cloud: Arc<dyn CloudAdapter>,
        hostfw: Arc<dyn HostFirewall>,
        hosts: Vec<HostRef>,
        monitor: Option<Arc<PolicyMonitor>>,
        strict: bool,
    ) -> Self {
        Self {
            source,
            cloud,
            hostfw,
            hosts,
            monitor,
            strict,
        }
    }

    /// Run one full reconciliation pass.
    ///
    /// In strict mode the cloud update gates host dispatch; in permissive
    /// mode cloud and hosts proceed concurrently since an isolated cloud
    /// outage must not also freeze host-level access control.
    pub async fn run_pass(&self, dry_run: bool) -> Result<ReconciliationReport> {
        let prefix = self
            .source
            .discover()
            .await
            .context("prefix discovery failed, no target was touched")?;

        let (cloud, hosts) = if self.strict {
            let cloud = self.reconcile_cloud(&prefix, dry_run).await;
            let hosts = if cloud.action == TargetAction::Failed {
                error!("Cloud update failed in strict mode, aborting host updates");
                self.hosts
                    .iter()
                    .map(|h| {
                        PassOutcome::failed(
                            format!("host:{}", h),
                            None,
                            "not attempted: pass aborted after cloud failure".to_string(),
                        )
                    })
                    .collect()
            } else {
                self.reconcile_hosts(&prefix, dry_run).await
            };
            (cloud, hosts)
        } else {
            tokio::join!(
                self.reconcile_cloud(&prefix, dry_run),
                self.reconcile_hosts(&prefix, dry_run)
            )
        };

        let cloud_ok = cloud.action != TargetAction::Failed;
        let hosts_ok = hosts.iter().all(|h| h.action != TargetAction::Failed);
        // Host failures are soft unless strict mode makes them fatal.
        let success = cloud_ok && (!self.strict || hosts_ok);

        let report = ReconciliationReport {
            prefix: prefix.to_string(),
            dry_run,
            cloud,
            hosts,
            success,
        };

        if report.success {
            info!("Pass complete for {}", report.prefix);
        } else {
            warn!("Pass finished with failures for {}", report.prefix);
        }
        Ok(report)
    }

    /// Pure inspection: discovery plus the read side of every target,
    /// mutating nothing.
    pub async fn inspect(&self) -> StatusReport {
        let (prefix, prefix_error) = match self.source.discover().await {
            Ok(p) => (Some(p), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let cloud = match self.cloud.read_current().await {
            Ok(value) => TargetState {
                target: self.cloud.identity(),
                in_sync: prefix.as_ref().map(|p| p.matches_str(&value)),
                value: Some(value),
                error: None,
            },
            Err(e) => TargetState {
                target: self.cloud.identity(),
                value: None,
                in_sync: None,
                error: Some(e.to_string()),
            },
        };

        let hosts = stream::iter(self.hosts.iter().enumerate())
            .map(|(idx, host)| {
                let prefix = prefix.as_ref();
                async move {
                    let state = match self.hostfw.read_entries(host).await {
                        Ok(entries) => TargetState {
                            target: format!("host:{}", host),
                            in_sync: prefix
                                .map(|p| entries.len() == 1 && p.matches_str(&entries[0])),
                            value: if entries.is_empty() {
                                None
                            } else {
                                Some(entries.join(", "))
                            },
                            error: None,
                        },
                        Err(e) => TargetState {
                            target: format!("host:{}", host),
                            value: None,
                            in_sync: None,
                            error: Some(e.to_string()),
                        },
                    };
                    (idx, state)
                }
            })
            .buffer_unordered(MAX_CONCURRENT_HOSTS)
            .collect::<Vec<_>>()
            .await;

        let mut hosts: Vec<(usize, TargetState)> = hosts;
        hosts.sort_by_key(|(idx, _)| *idx);

        StatusReport {
            prefix: prefix.map(|p| p.to_string()),
            prefix_error,
            cloud,
            hosts: hosts.into_iter().map(|(_, s)| s).collect(),
        }
    }

    async fn reconcile_cloud(&self, prefix: &NetworkPrefix, dry_run: bool) -> PassOutcome {
        let target = self.cloud.identity();

        let previous = match self.cloud.read_current().await {
            Ok(value) => value,
            Err(e) => {
                warn!("{}: read failed: {}", target, e);
                return PassOutcome::failed(target, None, e.to_string());
            }
        };

        if prefix.matches_str(&previous) {
            info!("{}: already at {}, nothing to do", target, prefix);
            return PassOutcome {
                target,
                previous: Some(previous),
                new: Some(prefix.to_string()),
                action: TargetAction::NoOp,
                error: None,
            };
        }

        if dry_run {
            info!("{}: would update {} -> {}", target, previous, prefix);
            return PassOutcome {
                target,
                previous: Some(previous),
                new: Some(prefix.to_string()),
                action: TargetAction::Updated,
                error: None,
            };
        }

        match self.write_cloud_with_heal(&target, prefix).await {
            Ok(()) => PassOutcome {
                target,
                previous: Some(previous),
                new: Some(prefix.to_string()),
                action: TargetAction::Updated,
                error: None,
            },
            Err(msg) => PassOutcome::failed(target, Some(previous), msg),
        }
    }

    /// Write the cloud rule; on failure consult the policy monitor and
    /// retry once if it remediated something.
    async fn write_cloud_with_heal(&self, target: &str, prefix: &NetworkPrefix) -> Result<(), String> {
        let first = match self.cloud.write(prefix).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!("{}: write failed: {}", target, first);

        if self.remediate(target).await {
            match self.cloud.write(prefix).await {
                Ok(()) => {
                    info!("{}: write succeeded after policy remediation", target);
                    return Ok(());
                }
                Err(retry) => return Err(retry.to_string()),
            }
        }
        Err(first.to_string())
    }

    async fn reconcile_hosts(&self, prefix: &NetworkPrefix, dry_run: bool) -> Vec<PassOutcome> {
        let mut outcomes: Vec<(usize, PassOutcome)> =
            stream::iter(self.hosts.iter().enumerate())
                .map(|(idx, host)| async move {
                    (idx, self.reconcile_host(host, prefix, dry_run).await)
                })
                .buffer_unordered(MAX_CONCURRENT_HOSTS)
                .collect()
                .await;
        outcomes.sort_by_key(|(idx, _)| *idx);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }

    async fn reconcile_host(
        &self,
        host: &HostRef,
        prefix: &NetworkPrefix,
        dry_run: bool,
    ) -> PassOutcome {
        let target = format!("host:{}", host);

        let entries = match self.hostfw.read_entries(host).await {
            Ok(entries) => entries,
            Err(e) => {
                // One unreachable peer must not block the rest of the pass.
                warn!("{}: read failed: {}", target, e);
                return PassOutcome::failed(target, None, e.to_string());
            }
        };
        let previous = if entries.is_empty() {
            None
        } else {
            Some(entries.join(", "))
        };

        let in_sync = entries.len() == 1 && prefix.matches_str(&entries[0]);
        if in_sync {
            info!("{}: already at {}, nothing to do", target, prefix);
            return PassOutcome {
                target,
                previous,
                new: Some(prefix.to_string()),
                action: TargetAction::NoOp,
                error: None,
            };
        }

        if dry_run {
            info!(
                "{}: would reconcile {{{}}} -> {}",
                target,
                entries.join(", "),
                prefix
            );
            return PassOutcome {
                target,
                previous,
                new: Some(prefix.to_string()),
                action: TargetAction::Updated,
                error: None,
            };
        }

        match self.apply_host_with_heal(&target, host, prefix).await {
            Ok(()) => PassOutcome {
                target,
                previous,
                new: Some(prefix.to_string()),
                action: TargetAction::Updated,
                error: None,
            },
            Err(msg) => PassOutcome::failed(target, previous, msg),
        }
    }

    async fn apply_host_with_heal(
        &self,
        target: &str,
        host: &HostRef,
        prefix: &NetworkPrefix,
    ) -> Result<(), String> {
        let first = match self.hostfw.apply(host, prefix).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!("{}: apply failed: {}", target, first);

        if self.remediate(target).await {
            match self.hostfw.apply(host, prefix).await {
                Ok(()) => {
                    info!("{}: apply succeeded after policy remediation", target);
                    return Ok(());
                }
                Err(retry) => return Err(retry.to_string()),
            }
        }
        Err(first.to_string())
    }

    async fn remediate(&self, context: &str) -> bool {
        match &self.monitor {
            Some(monitor) => monitor.handle_failure(context).await,
            None => false,
        }
    }
}
