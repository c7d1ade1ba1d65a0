//! Runner and session traits

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Where a runner executes its commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Subprocess on this host
    Local,
    /// Fresh SSH session per command
    Remote,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Local => f.write_str("local"),
            ExecMode::Remote => f.write_str("remote"),
        }
    }
}

/// Runs a shell command and returns its trimmed stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion
    async fn run(&self, command: &str) -> Result<String, ExecError>;

    /// Run `command`, giving up after `timeout`
    async fn run_with_timeout(&self, command: &str, timeout: Duration)
    -> Result<String, ExecError>;

    /// Execution mode, fixed at construction
    fn mode(&self) -> ExecMode;
}

/// One live remote session
///
/// Owned by whoever opened it and closed exactly once.
#[async_trait]
pub trait Session: Send {
    /// Execute `command` as-is on the remote host
    async fn exec(&mut self, command: &str) -> Result<CommandResult, ExecError>;

    /// Release the session; later calls are no-ops
    async fn close(&mut self) -> Result<(), ExecError>;
}

/// Opens remote sessions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one new session
    async fn connect(&self) -> Result<Box<dyn Session>, ExecError>;

    /// Whether commands get the `sudo ` prefix
    fn escalate(&self) -> bool;

    /// Label used in logs
    fn target(&self) -> String;
}
