//! Local command execution using `tokio::process`

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::{CommandRunner, ExecMode};

const DEFAULT_SHELL: &str = "/bin/sh";

/// Local command runner
///
/// Executes commands on the local machine through `<shell> -c <command>`.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    shell: PathBuf,
}

impl LocalRunner {
    /// Create a new local runner using `/bin/sh`
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }

    /// Use a different shell, e.g. `/bin/bash`
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run the command and collect its raw result
    ///
    /// A non-zero exit is not an error here, see [`CommandResult::into_output`].
    ///
    /// # Errors
    /// Returns `ExecError::SpawnError` if the shell cannot be started
    #[instrument(skip(self), level = "debug")]
    pub async fn execute(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, shell = %self.shell.display(), "executing local command");

        // Use shell to support pipes, redirections, etc.
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(cmd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let duration = start.elapsed();

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "command completed"
        );

        if !output.status.success() {
            error!(
                command = %cmd,
                status = status,
                stderr = %stderr,
                "command failed"
            );
        }

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, command: &str) -> Result<String, ExecError> {
        self.execute(command).await?.into_output(command)
    }

    #[instrument(skip(self), level = "debug")]
    async fn run_with_timeout(
        &self,
        command: &str,
        timeout_duration: Duration,
    ) -> Result<String, ExecError> {
        let start = Instant::now();

        debug!(command = %command, timeout = ?timeout_duration, "executing with timeout");

        // the child is killed when the future is dropped on expiry
        match timeout(timeout_duration, self.execute(command)).await {
            Ok(result) => result?.into_output(command),
            Err(_) => {
                error!(
                    command = %command,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Local
    }
}
