//! # prefixsync - IPv6 Prefix Reconciliation for Cloud and Host Firewalls
//!
//! Keeps a set of independently-administered firewalls - one cloud-provider
//! security list and any number of host-local packet filters - consistent
//! with a dynamically changing IPv6 prefix advertised by an upstream router.
//! The prefix is never known in advance; every participant converges on the
//! same value without manual intervention and without a window where the
//! network is fully closed or dangerously open.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        prefixsync                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: install, sync, status, uninstall           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! │    └── One immutable value per pass, no global state        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Discovery (ssh + ipnet)                                    │
//! │    └── Router introspection, two-pass prefix extraction     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reconciler                                                 │
//! │    ├── CloudTarget (oci CLI, rule matched by description)   │
//! │    └── FirewalldAdapter × N hosts (local + ssh payload)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Policy monitor (ausearch / audit2allow)                    │
//! │    └── Reactive SELinux denial diagnosis and self-heal      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Read before write** - a target is only mutated when its freshly-read
//!   state differs from the freshly-discovered prefix; re-running a pass is
//!   always a no-op when nothing changed.
//! - **Failure isolation** - one unreachable host never blocks the cloud
//!   rule or its sibling hosts; strict mode is the single switch that makes
//!   unresolved failures abort the remainder of a pass.
//! - **No rollback** - every step is idempotent, so recovery from a partial
//!   pass is simply the next pass.
//!
//! ## Example Usage
//!
//! ```no_run
//! use prefixsync::commands;
//! use prefixsync::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/prefixsync/config.yaml")?;
//!     let reconciler = commands::build_reconciler(&config, config.strict)?;
//!     let report = reconciler.run_pass(false).await?;
//!     println!("converged: {}", report.success);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`cloud`] - Cloud security-list target adapter
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`discovery`] - Prefix discovery against the upstream router
//! - [`error`] - Typed error taxonomy per target kind
//! - [`exec`] - Command execution abstraction with deadlines
//! - [`hostfw`] - Host firewall target adapter (firewalld)
//! - [`installer`] - System installation (systemd units, config)
//! - [`lock`] - File locking against overlapping passes
//! - [`policy`] - Security-policy denial monitor and remediation
//! - [`prefix`] - Network prefix value type and extraction
//! - [`reconcile`] - Reconciliation controller and reporting
//! - [`remote`] - SSH remote-execution channel

pub mod cli;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod hostfw;
pub mod installer;
pub mod lock;
pub mod policy;
pub mod prefix;
pub mod reconcile;
pub mod remote;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use prefix::NetworkPrefix;
pub use reconcile::{ReconciliationReport, Reconciler};
