//! anyhost-exec: Local-or-remote command execution
//!
//! A [`Runner`] built from an optional [`ConnectionConfig`] runs shell
//! commands either as a local subprocess or over a fresh SSH session per
//! command. [`InterruptHandler`] runs a cleanup callback on termination signals.

pub mod config;
pub mod error;
pub mod interrupt;
pub mod keys;
pub mod local;
pub mod remote;
pub mod result;
pub mod runner;
pub mod ssh;
pub mod traits;

pub use config::{Auth, ConnectionConfig};
pub use error::ExecError;
pub use interrupt::{CleanupFailure, InterruptHandler, TerminationSignal};
pub use keys::{KeyError, KeySource};
pub use local::LocalRunner;
pub use remote::RemoteRunner;
pub use result::CommandResult;
pub use runner::Runner;
pub use ssh::{SshConnector, SshSession};
pub use traits::{CommandRunner, Connector, ExecMode, Session};
