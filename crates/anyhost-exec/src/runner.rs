//! Runner factory: local or remote, decided once

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::ExecError;
use crate::local::LocalRunner;
use crate::remote::RemoteRunner;
use crate::ssh::SshConnector;
use crate::traits::{CommandRunner, ExecMode};

/// Runs commands locally or over SSH
///
/// The variant is chosen at construction and never changes.
#[derive(Debug, Clone)]
pub enum Runner {
    /// Subprocess on this host
    Local(LocalRunner),
    /// Fresh SSH session per command
    Remote(RemoteRunner<SshConnector>),
}

impl Runner {
    /// Build a runner: remote when `config` is present, local otherwise
    #[must_use]
    pub fn new(config: Option<Arc<ConnectionConfig>>) -> Self {
        match config {
            Some(config) => Self::remote(config),
            None => Self::local(),
        }
    }

    /// Local runner using `/bin/sh`
    #[must_use]
    pub fn local() -> Self {
        debug!("using local runner");
        Runner::Local(LocalRunner::new())
    }

    /// Remote runner for `config`
    #[must_use]
    pub fn remote(config: Arc<ConnectionConfig>) -> Self {
        debug!(host = %config.host, "using remote runner");
        Runner::Remote(RemoteRunner::new(SshConnector::new(config)))
    }
}

#[async_trait]
impl CommandRunner for Runner {
    async fn run(&self, command: &str) -> Result<String, ExecError> {
        match self {
            Runner::Local(runner) => runner.run(command).await,
            Runner::Remote(runner) => runner.run(command).await,
        }
    }

    async fn run_with_timeout(&self, command: &str, timeout: Duration) -> Result<String, ExecError> {
        match self {
            Runner::Local(runner) => runner.run_with_timeout(command, timeout).await,
            Runner::Remote(runner) => runner.run_with_timeout(command, timeout).await,
        }
    }

    fn mode(&self) -> ExecMode {
        match self {
            Runner::Local(runner) => runner.mode(),
            Runner::Remote(runner) => runner.mode(),
        }
    }
}
