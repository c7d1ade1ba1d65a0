//! Result types for command execution

use std::time::Duration;

use crate::error::ExecError;

/// Raw result of a command execution
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status code (0 for success, -1 when none was reported)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Trimmed stdout on success, `ExecError::CommandFailed` otherwise
    ///
    /// `command` is the text the caller asked for, which may differ from
    /// what was actually sent (e.g. without the `sudo ` prefix).
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` if the exit status is non-zero
    pub fn into_output(self, command: &str) -> Result<String, ExecError> {
        if self.success() {
            return Ok(self.stdout.trim().to_string());
        }

        let cause = if self.status < 0 {
            "terminated without exit status".to_string()
        } else {
            format!("exit status: {}", self.status)
        };

        Err(ExecError::CommandFailed {
            command: command.to_string(),
            stderr: self.stderr.trim_end().to_string(),
            cause,
        })
    }
}
