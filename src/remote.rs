//! SSH remote-execution channel.
//!
//! A thin, non-interactive channel to a `user@host` endpoint, used both for
//! router prefix discovery and for shipping the host firewall reconciliation
//! payload. Batch mode makes ssh fail outright instead of prompting for
//! credentials, which is what an unattended timer run needs.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::exec::{CommandOutput, CommandRunner};

/// Connect timeout passed to ssh.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Overall deadline for a single remote command, connect time included.
pub const COMMAND_DEADLINE_SECS: u64 = 30;

/// ssh exits with 255 on connection or authentication failure, as opposed
/// to forwarding the remote command's own exit code.
pub const SSH_CONNECT_FAILURE: i32 = 255;

/// Validate a `user@host` endpoint string.
///
/// Rejects anything that could be parsed by ssh as an option or smuggle a
/// shell metacharacter into the command line.
pub fn is_valid_endpoint(endpoint: &str) -> bool {
    !endpoint.is_empty()
        && !endpoint.starts_with('-')
        && endpoint
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@.-_:".contains(c))
}

/// SSH channel bound to a command runner.
#[derive(Clone)]
pub struct SshChannel {
    runner: Arc<dyn CommandRunner>,
}

impl SshChannel {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn base_args(endpoint: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            endpoint.to_string(),
            "--".to_string(),
        ]
    }

    /// Run a single command on the remote endpoint.
    pub async fn run(
        &self,
        endpoint: &str,
        command: &str,
        deadline: Duration,
    ) -> Result<CommandOutput> {
        anyhow::ensure!(
            is_valid_endpoint(endpoint),
            "invalid remote endpoint: {}",
            endpoint
        );
        let mut args = Self::base_args(endpoint);
        args.push(command.to_string());
        self.runner.run("ssh", &args, deadline).await
    }

    /// Ship a shell script to the remote endpoint and run it in one session.
    ///
    /// The script arrives on stdin of a remote `sh -s`, so the whole
    /// payload executes atomically in a single round trip.
    pub async fn run_script(
        &self,
        endpoint: &str,
        script: &str,
        deadline: Duration,
    ) -> Result<CommandOutput> {
        anyhow::ensure!(
            is_valid_endpoint(endpoint),
            "invalid remote endpoint: {}",
            endpoint
        );
        let mut args = Self::base_args(endpoint);
        args.push("sh -s".to_string());
        self.runner
            .run_with_stdin("ssh", &args, script, deadline)
            .await
    }
}
