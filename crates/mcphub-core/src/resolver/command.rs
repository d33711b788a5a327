//! Execution of `${cmd: …}` resolvers.
//!
//! The command string is opaque to the hub: it is handed to the OS shell
//! verbatim, so quoting and shell-reserved characters mean whatever the
//! user's shell says they mean. Execution is bounded by a timeout and the
//! captured stdout is trimmed of trailing whitespace.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Default wall-clock budget for one `${cmd: …}` execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure modes of a command resolver.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    #[error("command exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command produced no output")]
    EmptyOutput,
}

/// Executes resolver commands. The production implementation shells out;
/// tests substitute a stub so resolution stays deterministic.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` and return its stdout with trailing whitespace trimmed.
    async fn run(&self, command: &str) -> Result<String, CommandError>;
}

/// Shell-backed executor: `$SHELL -c` on unix (falling back to `/bin/sh`),
/// `cmd /C` on windows.
pub struct ShellExecutor {
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn shell_command(command: &str) -> Command {
        #[cfg(unix)]
        {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(command);
            cmd
        }
        #[cfg(not(unix))]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str) -> Result<String, CommandError> {
        debug!(timeout = ?self.timeout, "[Resolver] Executing command resolver");

        let mut cmd = Self::shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| CommandError::Spawn(e.to_string()))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandError::Timeout(self.timeout))?
            .map_err(|e| CommandError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(CommandError::NonZeroExit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string();
        if stdout.is_empty() {
            return Err(CommandError::EmptyOutput);
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_trims_trailing_whitespace() {
        let executor = ShellExecutor::new();
        let out = executor.run("printf 'hello \n\n'").await.unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let executor = ShellExecutor::new();
        let err = executor.run("exit 3").await.unwrap_err();
        assert!(matches!(err, CommandError::NonZeroExit { .. } | CommandError::EmptyOutput));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let executor = ShellExecutor::new();
        let err = executor.run("true").await.unwrap_err();
        assert!(matches!(err, CommandError::EmptyOutput));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let executor = ShellExecutor::with_timeout(Duration::from_millis(100));
        let err = executor.run("sleep 5").await.unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
    }
}
