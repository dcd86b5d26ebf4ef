//! CLI command implementations.

pub mod install;
pub mod status;
pub mod sync;
pub mod uninstall;

use anyhow::Result;
use std::sync::Arc;

use crate::cloud::{CloudTarget, OciCliApi};
use crate::config::Config;
use crate::discovery::RouterPrefixSource;
use crate::exec::RealCommandRunner;
use crate::hostfw::FirewalldAdapter;
use crate::policy::{Audit2allowRemediation, PolicyMonitor, Remediation};
use crate::reconcile::Reconciler;
use crate::remote::SshChannel;

/// Audit-trail keywords correlating denials with this tool's operations.
const DENIAL_KEYWORDS: &[&str] = &["firewall-cmd", "firewalld", "oci", "ssh"];

/// Wire up a reconciler from the configuration against the real system.
pub fn build_reconciler(config: &Config, strict: bool) -> Result<Reconciler> {
    anyhow::ensure!(
        !config.cloud.security_list_id.is_empty(),
        "cloud.security_list_id is not configured. Edit the config file first."
    );

    let runner = Arc::new(RealCommandRunner::new());
    let channel = SshChannel::new(runner.clone());

    let source = RouterPrefixSource::new(
        channel,
        config.router.endpoint.clone(),
        config.router.discovery_command.clone(),
        config.router.keyword.clone(),
        config.prefix_length,
    );

    let api = Arc::new(OciCliApi::new(runner.clone()));
    let cloud = CloudTarget::new(
        api,
        config.cloud.security_list_id.clone(),
        config.cloud.rule_description.clone(),
    );

    let hostfw = FirewalldAdapter::new(
        runner.clone(),
        config.firewall.set_name.clone(),
        config.firewall.zone.clone(),
    );

    let remediation: Option<Arc<dyn Remediation>> = if config.remediation {
        Some(Arc::new(Audit2allowRemediation::new(runner.clone())))
    } else {
        None
    };
    let monitor = PolicyMonitor::new(
        runner,
        DENIAL_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        remediation,
    );

    Ok(Reconciler::new(
        Arc::new(source),
        Arc::new(cloud),
        Arc::new(hostfw),
        config.host_refs()?,
        Some(Arc::new(monitor)),
        strict,
    ))
}
