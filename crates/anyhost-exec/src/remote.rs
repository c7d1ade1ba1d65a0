//! Remote command execution, one session per command

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, instrument, warn};

use crate::config::escalated;
use crate::error::ExecError;
use crate::traits::{CommandRunner, Connector, ExecMode};

/// Remote command runner
///
/// Every `run` opens a fresh session, executes the command and closes the
/// session again, whatever the outcome. Nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct RemoteRunner<C> {
    connector: C,
}

impl<C: Connector> RemoteRunner<C> {
    /// Create a runner on top of `connector`
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// Open, exec, close
    ///
    /// `limit` bounds connect and exec together; close always runs.
    #[instrument(skip(self), fields(target = %self.connector.target()))]
    async fn lifecycle(&self, command: &str, limit: Option<Duration>) -> Result<String, ExecError> {
        let deadline = limit.map(|timeout| (Instant::now() + timeout, timeout));

        let mut session = bounded(deadline, self.connector.connect()).await??;

        let remote_cmd = escalated(command, self.connector.escalate());
        debug!(command = %command, sent = %remote_cmd, "running remote command");

        let outcome = bounded(deadline, session.exec(&remote_cmd)).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close session");
        }

        match outcome {
            Ok(Ok(result)) => result.into_output(command),
            Ok(Err(e)) => {
                error!(command = %command, error = %e, "remote execution failed");
                Err(ExecError::CommandFailed {
                    command: command.to_string(),
                    stderr: String::new(),
                    cause: e.to_string(),
                })
            }
            Err(e) => {
                error!(command = %command, timeout = ?limit, "command timed out");
                Err(e)
            }
        }
    }
}

async fn bounded<F: Future>(
    deadline: Option<(Instant, Duration)>,
    fut: F,
) -> Result<F::Output, ExecError> {
    match deadline {
        Some((at, timeout)) => timeout_at(at, fut)
            .await
            .map_err(|_| ExecError::Timeout { timeout }),
        None => Ok(fut.await),
    }
}

#[async_trait]
impl<C: Connector> CommandRunner for RemoteRunner<C> {
    async fn run(&self, command: &str) -> Result<String, ExecError> {
        self.lifecycle(command, None).await
    }

    async fn run_with_timeout(&self, command: &str, timeout: Duration) -> Result<String, ExecError> {
        self.lifecycle(command, Some(timeout)).await
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Remote
    }
}
