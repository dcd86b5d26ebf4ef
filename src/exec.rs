//! Command execution abstraction for testability.
//!
//! A trait-based abstraction over process spawning, allowing unit tests to
//! mock system command calls without actually running them. Every invocation
//! carries a deadline; no external command may block a pass indefinitely.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[cfg(test)]
use mockall::automock;

/// Output from command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// The exit code, if available
    pub code: Option<i32>,
}

/// Trait for command execution, allowing dependency injection for testing.
///
/// The real implementation spawns actual processes; tests use mock
/// implementations to script command behavior.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion under the given deadline.
    async fn run(&self, cmd: &str, args: &[String], deadline: Duration) -> Result<CommandOutput>;

    /// Run a command with data written to its stdin, under the given deadline.
    async fn run_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin: &str,
        deadline: Duration,
    ) -> Result<CommandOutput>;
}

/// Real implementation that spawns system processes via tokio.
#[derive(Debug, Clone, Default)]
pub struct RealCommandRunner;

impl RealCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for RealCommandRunner {
    async fn run(&self, cmd: &str, args: &[String], deadline: Duration) -> Result<CommandOutput> {
        // kill_on_drop reaps the child if the deadline fires and the
        // output future is dropped.
        let fut = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", cmd, deadline))?
            .with_context(|| format!("Failed to execute {}", cmd))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }

    async fn run_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin_data: &str,
        deadline: Duration,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(stdin_data.as_bytes()).await?;
        }

        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", cmd, deadline))??;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Helper to convert a slice of &str to Vec<String>.
///
/// Mockall has issues with lifetimes in `&[&str]`, so the trait signature
/// uses `&[String]` instead.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_strings() {
        let args = args_to_strings(&["a", "b"]);
        assert_eq!(args, vec!["a".to_string(), "b".to_string()]);
        assert!(args_to_strings(&[]).is_empty());
    }

    #[test]
    fn test_command_output_default() {
        let output = CommandOutput::default();
        assert!(output.stdout.is_empty());
        assert!(!output.success);
        assert!(output.code.is_none());
    }

    #[tokio::test]
    async fn test_real_runner_echo() {
        let runner = RealCommandRunner::new();
        let args = args_to_strings(&["-n", "hello"]);
        let output = runner
            .run("echo", &args, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_real_runner_failure_exit_code() {
        let runner = RealCommandRunner::new();
        let args = args_to_strings(&["-c", "exit 3"]);
        let output = runner
            .run("sh", &args, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
    }

    #[tokio::test]
    async fn test_real_runner_stdin() {
        let runner = RealCommandRunner::new();
        let output = runner
            .run_with_stdin("cat", &[], "hello world", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello world");
    }

    #[tokio::test]
    async fn test_real_runner_deadline() {
        let runner = RealCommandRunner::new();
        let args = args_to_strings(&["5"]);
        let result = runner.run("sleep", &args, Duration::from_millis(50)).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_mock_runner() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|cmd, args, _| cmd == "firewall-cmd" && args == ["--reload".to_string()])
            .times(1)
            .returning(|_, _, _| {
                Ok(CommandOutput {
                    stdout: "success\n".to_string(),
                    stderr: String::new(),
                    success: true,
                    code: Some(0),
                })
            });

        let args = vec!["--reload".to_string()];
        let output = mock
            .run("firewall-cmd", &args, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(output.success);
    }
}
