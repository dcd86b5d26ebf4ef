//! Security-policy denial monitoring and best-effort remediation.
//!
//! When SELinux is enforcing, firewall or cloud-CLI operations can fail with
//! an AVC denial instead of a meaningful error. This module inspects the
//! audit trail for denials correlated with our operations and can attempt to
//! derive and install a minimal permission module. It runs only reactively,
//! after an adapter failure, and never influences the happy path.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::exec::CommandRunner;

/// How far back in the audit trail to look for correlated denials.
const DENIAL_WINDOW_MINUTES: i64 = 10;

/// Deadline for one audit-tool invocation.
const AUDIT_DEADLINE_SECS: u64 = 20;

/// Cap on retained evidence lines; the audit trail can be noisy and only
/// the most recent denials matter for remediation.
const MAX_EVIDENCE_LINES: usize = 50;

/// Recent denial lines correlated with our operations, most recent first.
#[derive(Debug, Clone, Default)]
pub struct DenialEvidence {
    pub lines: Vec<String>,
}

impl DenialEvidence {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Capability interface for policy remediation.
///
/// The controller only depends on "can attempt remediation, yes/no";
/// the concrete policy tooling stays behind this trait.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Remediation: Send + Sync {
    /// Try to derive and install a permission grant from the evidence.
    /// Returns true if a module was installed.
    async fn attempt(&self, evidence: &DenialEvidence) -> bool;
}

/// Remediation via the audit2allow/semodule toolchain.
pub struct Audit2allowRemediation {
    runner: Arc<dyn CommandRunner>,
}

impl Audit2allowRemediation {
    const MODULE_NAME: &'static str = "prefixsync_local";

    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Remediation for Audit2allowRemediation {
    async fn attempt(&self, evidence: &DenialEvidence) -> bool {
        if evidence.is_empty() {
            return false;
        }
        let deadline = Duration::from_secs(AUDIT_DEADLINE_SECS);

        // audit2allow reads raw denial records on stdin and writes the
        // compiled module next to the .te source.
        let args = vec!["-M".to_string(), Self::MODULE_NAME.to_string()];
        let input = evidence.lines.join("\n");
        let compiled = match self
            .runner
            .run_with_stdin("audit2allow", &args, &input, deadline)
            .await
        {
            Ok(output) if output.success => output,
            Ok(output) => {
                warn!("audit2allow failed: {}", output.stderr.trim());
                return false;
            }
            Err(e) => {
                warn!("audit2allow unavailable: {}", e);
                return false;
            }
        };
        debug!("audit2allow output: {}", compiled.stdout.trim());

        let args = vec![
            "-i".to_string(),
            format!("{}.pp", Self::MODULE_NAME),
        ];
        match self.runner.run("semodule", &args, deadline).await {
            Ok(output) if output.success => {
                info!("Installed policy module {}", Self::MODULE_NAME);
                true
            }
            Ok(output) => {
                warn!("semodule failed: {}", output.stderr.trim());
                false
            }
            Err(e) => {
                warn!("semodule unavailable: {}", e);
                false
            }
        }
    }
}

/// Monitor over the local audit trail.
pub struct PolicyMonitor {
    runner: Arc<dyn CommandRunner>,
    keywords: Vec<String>,
    remediation: Option<Arc<dyn Remediation>>,
}

impl PolicyMonitor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        keywords: Vec<String>,
        remediation: Option<Arc<dyn Remediation>>,
    ) -> Self {
        Self {
            runner,
            keywords,
            remediation,
        }
    }

    /// Scan the audit trail for recent denials matching our keywords.
    ///
    /// Returns a finite, most-recent-first sequence. A missing or
    /// unreadable audit trail yields empty evidence, not an error: the
    /// monitor is diagnostic and must never fail a pass by itself.
    pub async fn scan(&self) -> DenialEvidence {
        let since = Local::now() - ChronoDuration::minutes(DENIAL_WINDOW_MINUTES);
        let args = vec![
            "-m".to_string(),
            "avc".to_string(),
            "--start".to_string(),
            since.format("%m/%d/%Y").to_string(),
            since.format("%H:%M:%S").to_string(),
        ];

        let output = match self
            .runner
            .run("ausearch", &args, Duration::from_secs(AUDIT_DEADLINE_SECS))
            .await
        {
            Ok(output) if output.success => output,
            Ok(output) => {
                // ausearch exits non-zero when no matches exist.
                debug!("ausearch: {}", output.stderr.trim());
                return DenialEvidence::default();
            }
            Err(e) => {
                debug!("audit trail not available: {}", e);
                return DenialEvidence::default();
            }
        };

        let lines: Vec<String> = output
            .stdout
            .lines()
            .filter(|l| l.contains("denied"))
            .filter(|l| self.keywords.iter().any(|k| l.contains(k.as_str())))
            .rev()
            .take(MAX_EVIDENCE_LINES)
            .map(|l| l.to_string())
            .collect();

        DenialEvidence { lines }
    }

    /// React to an adapter failure: scan for correlated denials and, if a
    /// remediation strategy is configured, try it. Returns true if a
    /// remediation was installed (the caller may retry the failed write
    /// once). Failure to remediate is a warning, never an error.
    pub async fn handle_failure(&self, context: &str) -> bool {
        let evidence = self.scan().await;
        if evidence.is_empty() {
            debug!("No policy denials correlated with failure of {}", context);
            return false;
        }

        warn!(
            "{} policy denial(s) found near failure of {}; most recent: {}",
            evidence.lines.len(),
            context,
            evidence.lines[0]
        );

        match &self.remediation {
            Some(remediation) => {
                if remediation.attempt(&evidence).await {
                    info!("Policy remediation installed, a retry may succeed");
                    true
                } else {
                    warn!("Policy remediation did not succeed");
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};

    fn monitor_with(
        mock: MockCommandRunner,
        remediation: Option<Arc<dyn Remediation>>,
    ) -> PolicyMonitor {
        PolicyMonitor::new(
            Arc::new(mock),
            vec!["firewall-cmd".to_string(), "firewalld".to_string()],
            remediation,
        )
    }

    #[tokio::test]
    async fn test_scan_filters_by_keyword_most_recent_first() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                stdout: "\
type=AVC msg=audit(1): avc:  denied  { write } comm=\"firewall-cmd\" first\n\
type=AVC msg=audit(2): avc:  denied  { read } comm=\"sshd\" unrelated\n\
type=AVC msg=audit(3): avc:  denied  { write } comm=\"firewall-cmd\" second\n"
                    .to_string(),
                stderr: String::new(),
                success: true,
                code: Some(0),
            })
        });

        let evidence = monitor_with(mock, None).scan().await;
        assert_eq!(evidence.lines.len(), 2);
        assert!(evidence.lines[0].contains("second"));
        assert!(evidence.lines[1].contains("first"));
    }

    #[tokio::test]
    async fn test_scan_empty_when_no_matches() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: "<no matches>".to_string(),
                success: false,
                code: Some(1),
            })
        });

        let evidence = monitor_with(mock, None).scan().await;
        assert!(evidence.is_empty());
    }

    #[tokio::test]
    async fn test_handle_failure_without_evidence_no_remediation() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                success: true,
                code: Some(0),
            })
        });

        let mut remediation = MockRemediation::new();
        remediation.expect_attempt().times(0);

        let remediated = monitor_with(mock, Some(Arc::new(remediation)))
            .handle_failure("cloud:ALLOW_HOME_NETWORK")
            .await;
        assert!(!remediated);
    }

    #[tokio::test]
    async fn test_handle_failure_attempts_remediation() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|_, _, _| {
            Ok(CommandOutput {
                stdout: "avc:  denied  { write } comm=\"firewall-cmd\"\n".to_string(),
                stderr: String::new(),
                success: true,
                code: Some(0),
            })
        });

        let mut remediation = MockRemediation::new();
        remediation
            .expect_attempt()
            .times(1)
            .returning(|_| true);

        let remediated = monitor_with(mock, Some(Arc::new(remediation)))
            .handle_failure("host:local")
            .await;
        assert!(remediated);
    }

    #[tokio::test]
    async fn test_audit2allow_remediation_empty_evidence() {
        let remediation = Audit2allowRemediation::new(Arc::new(MockCommandRunner::new()));
        assert!(!remediation.attempt(&DenialEvidence::default()).await);
    }

    #[tokio::test]
    async fn test_audit2allow_remediation_pipeline() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run_with_stdin()
            .withf(|cmd, args, stdin, _| {
                cmd == "audit2allow" && args[0] == "-M" && stdin.contains("denied")
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    success: true,
                    code: Some(0),
                })
            });
        mock.expect_run()
            .withf(|cmd, args, _| cmd == "semodule" && args[1].ends_with(".pp"))
            .times(1)
            .returning(|_, _, _| {
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    success: true,
                    code: Some(0),
                })
            });

        let remediation = Audit2allowRemediation::new(Arc::new(mock));
        let evidence = DenialEvidence {
            lines: vec!["avc:  denied  { write } comm=\"firewall-cmd\"".to_string()],
        };
        assert!(remediation.attempt(&evidence).await);
    }
}
