//! Error types for anyhost-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running a command locally or remotely
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to open a session to the remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command ran but reported failure
    ///
    /// The message shape is the same for local and remote execution.
    #[error("executing {command} : {stderr} [{cause}]")]
    CommandFailed {
        /// Command text as given by the caller
        command: String,
        /// Captured stderr output
        stderr: String,
        /// Underlying cause (exit status or transport error)
        cause: String,
    },

    /// Command timed out
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Session already closed
    #[error("not connected")]
    NotConnected,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Signal registration failed
    #[error("signal handler error: {0}")]
    SignalError(String),
}

impl ExecError {
    /// Check if the error happened before the command reached its target
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::AuthenticationFailed(_)
                | ExecError::SshKeyError(_)
        )
    }

    /// Captured stderr, when the command itself failed
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExecError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message() {
        let err = ExecError::CommandFailed {
            command: "ls /nope".to_string(),
            stderr: "ls: cannot access '/nope'".to_string(),
            cause: "exit status: 2".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "executing ls /nope : ls: cannot access '/nope' [exit status: 2]"
        );
        assert_eq!(err.stderr(), Some("ls: cannot access '/nope'"));
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_connection_error_kinds() {
        assert!(ExecError::ConnectionFailed("refused".into()).is_connection_error());
        assert!(ExecError::AuthenticationFailed("denied".into()).is_connection_error());
        assert!(!ExecError::NotConnected.is_connection_error());
    }
}
