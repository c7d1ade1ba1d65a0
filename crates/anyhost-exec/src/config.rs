//! Remote connection configuration

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::keys::KeySource;

/// Parameters identifying and authenticating a remote host
///
/// Immutable once built. Runners and connectors share it through an `Arc`.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (default root)
    #[serde(default = "default_user")]
    pub user: String,
    /// Path to a private key file
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    /// Environment variable holding a base64-encoded private key
    #[serde(default)]
    pub private_key_env: Option<String>,
    /// Passphrase for an encrypted private key
    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,
    /// Password for password authentication
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Prefix every remote command with `sudo `
    #[serde(default = "default_escalate")]
    pub escalate: bool,
    /// Verify the server key against `~/.ssh/known_hosts`
    #[serde(default)]
    pub strict_host_key_checking: bool,
    /// Upper bound for opening a session, in milliseconds
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

fn default_escalate() -> bool {
    true
}

/// Prefix `command` with `sudo ` when `escalate` is set
pub(crate) fn escalated(command: &str, escalate: bool) -> String {
    if escalate {
        format!("sudo {command}")
    } else {
        command.to_string()
    }
}

/// How a session authenticates
#[derive(Debug, Clone)]
pub enum Auth {
    /// Public key authentication
    Key {
        /// Where the private key comes from
        source: KeySource,
        /// Optional passphrase
        passphrase: Option<String>,
    },
    /// Password authentication
    Password(String),
}

impl ConnectionConfig {
    /// Create new connection config with defaults
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            private_key: None,
            private_key_env: None,
            passphrase: None,
            password: None,
            escalate: default_escalate(),
            strict_host_key_checking: false,
            connect_timeout_ms: None,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set private key path
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key = Some(path.into());
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_key_env(mut self, var_name: impl Into<String>) -> Self {
        self.private_key_env = Some(var_name.into());
        self
    }

    /// Set passphrase for the private key
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Enable or disable the `sudo ` prefix
    #[must_use]
    pub fn with_escalate(mut self, escalate: bool) -> Self {
        self.escalate = escalate;
        self
    }

    /// Enable known_hosts verification
    #[must_use]
    pub fn with_strict_host_key_checking(mut self, strict: bool) -> Self {
        self.strict_host_key_checking = strict;
        self
    }

    /// Bound session setup, kept to millisecond precision
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.connect_timeout_ms = Some(millis);
        self
    }

    /// Session setup bound, if any
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Text actually sent to the remote shell for `command`
    #[must_use]
    pub fn remote_command(&self, command: &str) -> String {
        escalated(command, self.escalate)
    }

    /// Pick the authentication method
    ///
    /// A key path wins over a key from the environment, which wins over a password.
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if no method is configured
    pub fn auth(&self) -> Result<Auth, ExecError> {
        let passphrase = self.passphrase.clone();
        if let Some(path) = &self.private_key {
            return Ok(Auth::Key {
                source: KeySource::Path(path.clone()),
                passphrase,
            });
        }
        if let Some(var) = &self.private_key_env {
            return Ok(Auth::Key {
                source: KeySource::Env(var.clone()),
                passphrase,
            });
        }
        if let Some(password) = &self.password {
            return Ok(Auth::Password(password.clone()));
        }
        Err(ExecError::ConfigError(format!(
            "no authentication method configured for {}",
            self.host
        )))
    }

    /// Check the config is usable before any connection attempt
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` on an empty host or user, or a missing auth method
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.host.trim().is_empty() {
            return Err(ExecError::ConfigError("host must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(ExecError::ConfigError("user must not be empty".to_string()));
        }
        self.auth().map(|_| ())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("private_key", &self.private_key)
            .field("private_key_env", &self.private_key_env)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("escalate", &self.escalate)
            .field("strict_host_key_checking", &self.strict_host_key_checking)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish_non_exhaustive()
    }
}
