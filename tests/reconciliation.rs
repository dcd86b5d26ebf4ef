//! End-to-end reconciliation tests against in-memory fakes.
//!
//! These exercise the controller and the firewalld adapter with no system
//! access: targets are in-memory state machines implementing the public
//! adapter traits, plus a scripted firewall-cmd interpreter for the real
//! adapter's local code path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prefixsync::cloud::CloudAdapter;
use prefixsync::discovery::PrefixSource;
use prefixsync::error::{CloudError, DiscoveryError, HostError};
use prefixsync::exec::{CommandOutput, CommandRunner};
use prefixsync::hostfw::{FirewalldAdapter, HostFirewall, HostRef};
use prefixsync::prefix::NetworkPrefix;
use prefixsync::reconcile::{Reconciler, TargetAction};

/// Discovery fake that re-parses its token on every call, so length
/// validation behaves exactly like the real source.
struct FakeSource {
    token: String,
    expected_len: u8,
}

impl FakeSource {
    fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            expected_len: 64,
        }
    }
}

#[async_trait]
impl PrefixSource for FakeSource {
    async fn discover(&self) -> Result<NetworkPrefix, DiscoveryError> {
        NetworkPrefix::parse(&self.token, self.expected_len)
    }
}

/// Cloud fake: a rule collection with write counting.
struct FakeCloud {
    rules: Mutex<Vec<(Option<String>, String)>>,
    description: String,
    writes: AtomicUsize,
}

impl FakeCloud {
    fn new(rules: Vec<(Option<&str>, &str)>, description: &str) -> Self {
        Self {
            rules: Mutex::new(
                rules
                    .into_iter()
                    .map(|(d, s)| (d.map(|d| d.to_string()), s.to_string()))
                    .collect(),
            ),
            description: description.to_string(),
            writes: AtomicUsize::new(0),
        }
    }

    fn current_source(&self) -> Option<String> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(d, _)| d.as_deref() == Some(self.description.as_str()))
            .map(|(_, s)| s.clone())
    }

    fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudAdapter for FakeCloud {
    fn identity(&self) -> String {
        format!("cloud:{}", self.description)
    }

    async fn read_current(&self) -> Result<String, CloudError> {
        let rules = self.rules.lock().unwrap();
        let matches: Vec<&String> = rules
            .iter()
            .filter(|(d, _)| d.as_deref() == Some(self.description.as_str()))
            .map(|(_, s)| s)
            .collect();
        match matches.len() {
            0 => Err(CloudError::NotFound(self.description.clone())),
            1 => Ok(matches[0].clone()),
            n => Err(CloudError::AmbiguousMatch {
                description: self.description.clone(),
                count: n,
            }),
        }
    }

    async fn write(&self, prefix: &NetworkPrefix) -> Result<(), CloudError> {
        let mut rules = self.rules.lock().unwrap();
        let indices: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, (d, _))| d.as_deref() == Some(self.description.as_str()))
            .map(|(i, _)| i)
            .collect();
        match indices.len() {
            0 => Err(CloudError::NotFound(self.description.clone())),
            1 => {
                rules[indices[0]].1 = prefix.to_string();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            n => Err(CloudError::AmbiguousMatch {
                description: self.description.clone(),
                count: n,
            }),
        }
    }
}

/// Host fleet fake: one address-set per host, some hosts unreachable.
struct FakeFleet {
    sets: Mutex<HashMap<String, Vec<String>>>,
    unreachable: Vec<String>,
    writes: AtomicUsize,
}

impl FakeFleet {
    fn new(sets: Vec<(&str, Vec<&str>)>, unreachable: Vec<&str>) -> Self {
        Self {
            sets: Mutex::new(
                sets.into_iter()
                    .map(|(h, e)| {
                        (
                            h.to_string(),
                            e.into_iter().map(|s| s.to_string()).collect(),
                        )
                    })
                    .collect(),
            ),
            unreachable: unreachable.into_iter().map(|s| s.to_string()).collect(),
            writes: AtomicUsize::new(0),
        }
    }

    fn entries(&self, host: &str) -> Vec<String> {
        self.sets
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostFirewall for FakeFleet {
    async fn read_entries(&self, host: &HostRef) -> Result<Vec<String>, HostError> {
        let key = host.to_string();
        if self.unreachable.contains(&key) {
            return Err(HostError::Unreachable("connection timed out".to_string()));
        }
        Ok(self.entries(&key))
    }

    async fn apply(&self, host: &HostRef, prefix: &NetworkPrefix) -> Result<(), HostError> {
        let key = host.to_string();
        if self.unreachable.contains(&key) {
            return Err(HostError::Unreachable("connection timed out".to_string()));
        }
        self.sets
            .lock()
            .unwrap()
            .insert(key, vec![prefix.to_string()]);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn reconciler(
    source: FakeSource,
    cloud: Arc<FakeCloud>,
    fleet: Arc<FakeFleet>,
    hosts: Vec<HostRef>,
    strict: bool,
) -> Reconciler {
    Reconciler::new(Arc::new(source), cloud, fleet, hosts, None, strict)
}

fn hosts_local_and(remote: &[&str]) -> Vec<HostRef> {
    let mut hosts = vec![HostRef::Local];
    hosts.extend(
        remote
            .iter()
            .map(|e| HostRef::Remote(e.to_string())),
    );
    hosts
}

#[tokio::test]
async fn convergence_then_idempotence() {
    let cloud = Arc::new(FakeCloud::new(
        vec![
            (Some("SSH_ANYWHERE"), "0.0.0.0/0"),
            (Some("ALLOW_HOME_NETWORK"), "2001:db8:0000::/64"),
        ],
        "ALLOW_HOME_NETWORK",
    ));
    let fleet = Arc::new(FakeFleet::new(
        vec![
            ("local", vec!["2001:db8:aaaa::/64"]),
            ("root@fw1", vec![]),
        ],
        vec![],
    ));

    let r = reconciler(
        FakeSource::new("2001:db8:1234::/64"),
        cloud.clone(),
        fleet.clone(),
        hosts_local_and(&["root@fw1"]),
        false,
    );

    // First pass: every target converges.
    let report = r.run_pass(false).await.unwrap();
    assert!(report.success);
    assert_eq!(report.cloud.action, TargetAction::Updated);
    assert!(report.hosts.iter().all(|h| h.action == TargetAction::Updated));
    assert_eq!(
        cloud.current_source().as_deref(),
        Some("2001:db8:1234::/64")
    );
    assert_eq!(fleet.entries("local"), vec!["2001:db8:1234::/64"]);
    assert_eq!(fleet.entries("root@fw1"), vec!["2001:db8:1234::/64"]);

    let cloud_writes = cloud.write_count();
    let host_writes = fleet.write_count();

    // Second pass with no external change: pure no-op, zero new writes.
    let report = r.run_pass(false).await.unwrap();
    assert!(report.success);
    assert_eq!(report.cloud.action, TargetAction::NoOp);
    assert!(report.hosts.iter().all(|h| h.action == TargetAction::NoOp));
    assert_eq!(cloud.write_count(), cloud_writes);
    assert_eq!(fleet.write_count(), host_writes);
}

#[tokio::test]
async fn isolation_of_unreachable_host() {
    let cloud = Arc::new(FakeCloud::new(
        vec![(Some("ALLOW_HOME_NETWORK"), "2001:db8:0000::/64")],
        "ALLOW_HOME_NETWORK",
    ));
    let fleet = Arc::new(FakeFleet::new(
        vec![("local", vec![]), ("root@fw2", vec![])],
        vec!["root@dead"],
    ));

    let r = reconciler(
        FakeSource::new("2001:db8:1234::/64"),
        cloud.clone(),
        fleet.clone(),
        hosts_local_and(&["root@dead", "root@fw2"]),
        false,
    );

    let report = r.run_pass(false).await.unwrap();
    // Permissive toward host failures: the pass still succeeds.
    assert!(report.success);
    assert_eq!(report.cloud.action, TargetAction::Updated);
    assert_eq!(report.hosts[0].action, TargetAction::Updated);
    assert_eq!(report.hosts[1].action, TargetAction::Failed);
    assert_eq!(report.hosts[2].action, TargetAction::Updated);
    // The siblings actually converged.
    assert_eq!(fleet.entries("local"), vec!["2001:db8:1234::/64"]);
    assert_eq!(fleet.entries("root@fw2"), vec!["2001:db8:1234::/64"]);
}

#[tokio::test]
async fn wrong_length_means_zero_writes() {
    let cloud = Arc::new(FakeCloud::new(
        vec![(Some("ALLOW_HOME_NETWORK"), "2001:db8:0000::/64")],
        "ALLOW_HOME_NETWORK",
    ));
    let fleet = Arc::new(FakeFleet::new(vec![("local", vec![])], vec![]));

    let r = reconciler(
        FakeSource::new("2001:db8::/56"),
        cloud.clone(),
        fleet.clone(),
        vec![HostRef::Local],
        false,
    );

    let err = r.run_pass(false).await.unwrap_err();
    assert!(err.to_string().contains("no target was touched"));
    assert_eq!(cloud.write_count(), 0);
    assert_eq!(fleet.write_count(), 0);
    // The stale cloud value is untouched.
    assert_eq!(
        cloud.current_source().as_deref(),
        Some("2001:db8:0000::/64")
    );
}

#[tokio::test]
async fn ambiguous_cloud_rule_means_zero_cloud_writes() {
    let cloud = Arc::new(FakeCloud::new(
        vec![
            (Some("ALLOW_HOME_NETWORK"), "2001:db8:a::/64"),
            (Some("ALLOW_HOME_NETWORK"), "2001:db8:b::/64"),
        ],
        "ALLOW_HOME_NETWORK",
    ));
    let fleet = Arc::new(FakeFleet::new(vec![("local", vec![])], vec![]));

    let r = reconciler(
        FakeSource::new("2001:db8:1234::/64"),
        cloud.clone(),
        fleet.clone(),
        vec![HostRef::Local],
        false,
    );

    let report = r.run_pass(false).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.cloud.action, TargetAction::Failed);
    assert!(report
        .cloud
        .error
        .as_deref()
        .unwrap()
        .contains("refusing to guess"));
    assert_eq!(cloud.write_count(), 0);
    // Permissive mode: the host still converged.
    assert_eq!(fleet.entries("local"), vec!["2001:db8:1234::/64"]);
}

#[tokio::test]
async fn dry_run_reports_without_mutating() {
    let cloud = Arc::new(FakeCloud::new(
        vec![(Some("ALLOW_HOME_NETWORK"), "2001:db8:0000::/64")],
        "ALLOW_HOME_NETWORK",
    ));
    let fleet = Arc::new(FakeFleet::new(
        vec![("local", vec!["2001:db8:aaaa::/64"])],
        vec![],
    ));

    let r = reconciler(
        FakeSource::new("2001:db8:1234::/64"),
        cloud.clone(),
        fleet.clone(),
        vec![HostRef::Local],
        false,
    );

    let report = r.run_pass(true).await.unwrap();
    assert!(report.dry_run);
    assert!(report.success);
    // The hypothetical actions are recorded with the same shape as a real
    // run...
    assert_eq!(report.cloud.action, TargetAction::Updated);
    assert_eq!(report.hosts[0].action, TargetAction::Updated);
    // ...but nothing was written anywhere.
    assert_eq!(cloud.write_count(), 0);
    assert_eq!(fleet.write_count(), 0);
    assert_eq!(
        cloud.current_source().as_deref(),
        Some("2001:db8:0000::/64")
    );
    assert_eq!(fleet.entries("local"), vec!["2001:db8:aaaa::/64"]);
}

#[tokio::test]
async fn strict_mode_makes_host_failure_fatal() {
    let cloud = Arc::new(FakeCloud::new(
        vec![(Some("ALLOW_HOME_NETWORK"), "2001:db8:0000::/64")],
        "ALLOW_HOME_NETWORK",
    ));
    let fleet = Arc::new(FakeFleet::new(
        vec![("local", vec![])],
        vec!["root@dead"],
    ));

    let r = reconciler(
        FakeSource::new("2001:db8:1234::/64"),
        cloud.clone(),
        fleet.clone(),
        hosts_local_and(&["root@dead"]),
        true,
    );

    let report = r.run_pass(false).await.unwrap();
    assert!(!report.success);
    // Siblings are still attempted: host failures never cross-propagate.
    assert_eq!(report.hosts[0].action, TargetAction::Updated);
    assert_eq!(report.hosts[1].action, TargetAction::Failed);
}

/// The end-to-end scenario: cloud rule converges, one of two hosts times
/// out, and the pass still counts as a success when permissive.
#[tokio::test]
async fn end_to_end_example_scenario() {
    let cloud = Arc::new(FakeCloud::new(
        vec![(Some("ALLOW_HOME_NETWORK@NET28"), "2001:db8:0000::/64")],
        "ALLOW_HOME_NETWORK@NET28",
    ));
    let fleet = Arc::new(FakeFleet::new(
        vec![("root@fw1", vec![])],
        vec!["root@fw2"],
    ));

    let r = reconciler(
        FakeSource::new("2001:db8:1234::/64"),
        cloud.clone(),
        fleet.clone(),
        vec![
            HostRef::Remote("root@fw1".to_string()),
            HostRef::Remote("root@fw2".to_string()),
        ],
        false,
    );

    let report = r.run_pass(false).await.unwrap();
    assert!(report.success);
    assert_eq!(report.prefix, "2001:db8:1234::/64");
    assert_eq!(report.cloud.action, TargetAction::Updated);
    assert_eq!(
        cloud.current_source().as_deref(),
        Some("2001:db8:1234::/64")
    );
    assert_eq!(report.hosts[0].action, TargetAction::Updated);
    assert_eq!(report.hosts[1].action, TargetAction::Failed);
    assert!(report.hosts[1]
        .error
        .as_deref()
        .unwrap()
        .contains("unreachable"));
}

// ---------------------------------------------------------------------------
// Set reconciliation through the real firewalld adapter, against a scripted
// firewall-cmd interpreter.
// ---------------------------------------------------------------------------

/// In-memory firewalld: interprets the firewall-cmd invocations the local
/// adapter path issues.
struct FakeFirewalld {
    ipsets: Mutex<HashMap<String, Vec<String>>>,
    rich_rules: Mutex<Vec<String>>,
    reloads: AtomicUsize,
}

impl FakeFirewalld {
    fn new(sets: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            ipsets: Mutex::new(
                sets.into_iter()
                    .map(|(n, e)| {
                        (
                            n.to_string(),
                            e.into_iter().map(|s| s.to_string()).collect(),
                        )
                    })
                    .collect(),
            ),
            rich_rules: Mutex::new(Vec::new()),
            reloads: AtomicUsize::new(0),
        }
    }

    fn entries(&self, set: &str) -> Vec<String> {
        self.ipsets
            .lock()
            .unwrap()
            .get(set)
            .cloned()
            .unwrap_or_default()
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
            code: Some(0),
        }
    }

    fn no() -> CommandOutput {
        CommandOutput {
            stdout: "no\n".to_string(),
            stderr: String::new(),
            success: false,
            code: Some(1),
        }
    }

    fn arg_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
        args.iter()
            .find_map(|a| a.strip_prefix(key))
    }
}

#[async_trait]
impl CommandRunner for FakeFirewalld {
    async fn run(
        &self,
        cmd: &str,
        args: &[String],
        _deadline: Duration,
    ) -> anyhow::Result<CommandOutput> {
        assert_eq!(cmd, "firewall-cmd", "unexpected command {}", cmd);

        if args.iter().any(|a| a == "--reload") {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            return Ok(Self::ok("success\n"));
        }
        if args.iter().any(|a| a == "--get-ipsets") {
            let names: Vec<String> = self.ipsets.lock().unwrap().keys().cloned().collect();
            return Ok(Self::ok(&names.join(" ")));
        }
        if let Some(name) = Self::arg_value(args, "--new-ipset=") {
            self.ipsets
                .lock()
                .unwrap()
                .insert(name.to_string(), Vec::new());
            return Ok(Self::ok("success\n"));
        }
        if let Some(rule) = Self::arg_value(args, "--query-rich-rule=") {
            let present = self.rich_rules.lock().unwrap().iter().any(|r| r == rule);
            return Ok(if present { Self::ok("yes\n") } else { Self::no() });
        }
        if let Some(rule) = Self::arg_value(args, "--add-rich-rule=") {
            self.rich_rules.lock().unwrap().push(rule.to_string());
            return Ok(Self::ok("success\n"));
        }
        if let Some(set) = Self::arg_value(args, "--ipset=") {
            if args.iter().any(|a| a == "--get-entries") {
                return Ok(Self::ok(&self.entries(set).join("\n")));
            }
            if let Some(entry) = Self::arg_value(args, "--remove-entry=") {
                let mut ipsets = self.ipsets.lock().unwrap();
                if let Some(entries) = ipsets.get_mut(set) {
                    entries.retain(|e| e != entry);
                }
                return Ok(Self::ok("success\n"));
            }
            if let Some(entry) = Self::arg_value(args, "--add-entry=") {
                let mut ipsets = self.ipsets.lock().unwrap();
                if let Some(entries) = ipsets.get_mut(set) {
                    entries.push(entry.to_string());
                }
                return Ok(Self::ok("success\n"));
            }
        }
        panic!("unhandled firewall-cmd invocation: {:?}", args);
    }

    async fn run_with_stdin(
        &self,
        _cmd: &str,
        _args: &[String],
        _stdin: &str,
        _deadline: Duration,
    ) -> anyhow::Result<CommandOutput> {
        panic!("local reconciliation must not open a remote session");
    }
}

#[tokio::test]
async fn set_reconciliation_replaces_stale_entries() {
    let firewalld = Arc::new(FakeFirewalld::new(vec![(
        "home-prefix6",
        vec!["2001:db8:aaaa::/64", "2001:db8:bbbb::/64"],
    )]));
    let adapter = FirewalldAdapter::new(
        firewalld.clone(),
        "home-prefix6".to_string(),
        "public".to_string(),
    );

    let prefix = NetworkPrefix::parse("2001:db8:cccc::/64", 64).unwrap();
    adapter.apply(&HostRef::Local, &prefix).await.unwrap();

    // Membership is exactly {prefix}: stale entries gone, nothing extra.
    assert_eq!(firewalld.entries("home-prefix6"), vec!["2001:db8:cccc::/64"]);
    // The zone rule was created and the staged config applied.
    assert_eq!(firewalld.rich_rules.lock().unwrap().len(), 1);
    assert!(firewalld.reloads.load(Ordering::SeqCst) >= 1);

    // Read-back through the adapter agrees.
    let entries = adapter.read_entries(&HostRef::Local).await.unwrap();
    assert_eq!(entries, vec!["2001:db8:cccc::/64"]);

    // A second apply is a pure no-op on membership.
    adapter.apply(&HostRef::Local, &prefix).await.unwrap();
    assert_eq!(firewalld.entries("home-prefix6"), vec!["2001:db8:cccc::/64"]);
}

#[tokio::test]
async fn set_created_when_absent() {
    let firewalld = Arc::new(FakeFirewalld::new(vec![]));
    let adapter = FirewalldAdapter::new(
        firewalld.clone(),
        "home-prefix6".to_string(),
        "public".to_string(),
    );

    let prefix = NetworkPrefix::parse("2001:db8:1234::/64", 64).unwrap();
    adapter.apply(&HostRef::Local, &prefix).await.unwrap();

    assert_eq!(firewalld.entries("home-prefix6"), vec!["2001:db8:1234::/64"]);
}
