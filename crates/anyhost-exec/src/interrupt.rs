//! Cleanup on SIGHUP, SIGINT and SIGTERM

use std::fmt;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExecError;

/// Cleanup failures kept until read; later ones are logged and dropped
pub const FAILURE_QUEUE: usize = 64;

/// Signals that trigger cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGHUP
    Hangup,
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Hangup => f.write_str("SIGHUP"),
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// A cleanup invocation that returned an error
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    /// Signal that triggered the cleanup
    pub signal: TerminationSignal,
    /// Rendered error
    pub error: String,
}

/// Listens for termination signals until stopped
///
/// Each received signal runs the cleanup callback once on the blocking pool.
/// The listener does not wait for a previous cleanup to finish, so slow
/// callbacks may overlap. It never exits the process on its own.
///
/// Dropping the handler stops the listening task.
#[derive(Debug)]
pub struct InterruptHandler {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
    failures: mpsc::Receiver<CleanupFailure>,
}

impl InterruptHandler {
    /// Register for SIGHUP, SIGINT and SIGTERM and start listening
    ///
    /// Signals are registered before this returns, so none sent afterwards
    /// is missed.
    ///
    /// # Errors
    /// Returns `ExecError::SignalError` when called outside a tokio runtime
    /// or if a signal cannot be registered
    pub fn install<F, E>(cleanup: F) -> Result<Self, ExecError>
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
    {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| ExecError::SignalError(e.to_string()))?;

        let register =
            |kind: SignalKind| signal(kind).map_err(|e| ExecError::SignalError(e.to_string()));
        let mut hangup = register(SignalKind::hangup())?;
        let mut interrupt = register(SignalKind::interrupt())?;
        let mut terminate = register(SignalKind::terminate())?;

        let (stop, mut stop_rx) = oneshot::channel::<()>();
        let (failure_tx, failures) = mpsc::channel(FAILURE_QUEUE);
        let cleanup = Arc::new(cleanup);

        let task = rt.spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = &mut stop_rx => break,
                    Some(()) = hangup.recv() => TerminationSignal::Hangup,
                    Some(()) = interrupt.recv() => TerminationSignal::Interrupt,
                    Some(()) = terminate.recv() => TerminationSignal::Terminate,
                    else => break,
                };

                info!(signal = %received, "termination signal received, running cleanup");

                let cleanup = Arc::clone(&cleanup);
                let failure_tx = failure_tx.clone();
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = cleanup() {
                        report(
                            &failure_tx,
                            CleanupFailure {
                                signal: received,
                                error: e.to_string(),
                            },
                        );
                    }
                });
            }
            debug!("interrupt handler stopped");
        });

        Ok(Self {
            stop,
            task,
            failures,
        })
    }

    /// Wait for the next cleanup failure
    ///
    /// Waits indefinitely while the handler is listening. Returns `None` only
    /// if the listening task has ended on its own and no cleanup is running.
    pub async fn next_failure(&mut self) -> Option<CleanupFailure> {
        self.failures.recv().await
    }

    /// Take a cleanup failure if one is queued
    pub fn try_next_failure(&mut self) -> Option<CleanupFailure> {
        self.failures.try_recv().ok()
    }

    /// Stop listening and wait for the listening task to end
    ///
    /// Cleanups already running are not interrupted.
    pub async fn stop(self) {
        let InterruptHandler { stop, task, .. } = self;
        let _ = stop.send(());
        if let Err(e) = task.await {
            warn!(error = %e, "interrupt handler task failed");
        }
    }
}

fn report(failure_tx: &mpsc::Sender<CleanupFailure>, failure: CleanupFailure) {
    warn!(signal = %failure.signal, error = %failure.error, "cleanup failed");
    if let Err(mpsc::error::TrySendError::Full(dropped)) = failure_tx.try_send(failure) {
        debug!(signal = %dropped.signal, "failure queue full, dropping report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_outside_runtime() {
        let result = InterruptHandler::install(|| Ok::<(), ExecError>(()));

        assert!(matches!(result, Err(ExecError::SignalError(_))));
    }

    #[test]
    fn test_failure_queue_is_bounded() {
        let (failure_tx, mut failures) = mpsc::channel(FAILURE_QUEUE);

        for n in 0..FAILURE_QUEUE + 5 {
            report(
                &failure_tx,
                CleanupFailure {
                    signal: TerminationSignal::Hangup,
                    error: format!("failure {n}"),
                },
            );
        }

        let mut queued = Vec::new();
        while let Ok(failure) = failures.try_recv() {
            queued.push(failure.error);
        }

        assert_eq!(queued.len(), FAILURE_QUEUE);
        assert_eq!(queued[0], "failure 0");
    }
}
