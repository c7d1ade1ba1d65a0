//! SSH sessions using russh crate

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, check_known_hosts};
use russh::{ChannelMsg, Disconnect, client};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{Auth, ConnectionConfig};
use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::{Connector, Session};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    host: String,
    port: u16,
    strict: bool,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.strict {
            // like StrictHostKeyChecking=no
            return Ok(true);
        }

        match check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(host = %self.host, "server key not found in known_hosts");
                Ok(false)
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "server key rejected");
                Ok(false)
            }
        }
    }
}

/// Credentials loaded before any network traffic
enum Credentials {
    Key(PrivateKey),
    Password(String),
}

/// Opens one SSH session per call
///
/// Holds the configuration by `Arc` and never mutates it.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: Arc<ConnectionConfig>,
}

impl SshConnector {
    /// Create a connector for `config`
    #[must_use]
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        Self { config }
    }

    fn credentials(&self) -> Result<Credentials, ExecError> {
        match self.config.auth()? {
            Auth::Key { source, passphrase } => source
                .load(passphrase.as_deref())
                .map(Credentials::Key)
                .map_err(|e| ExecError::SshKeyError(e.to_string())),
            Auth::Password(password) => Ok(Credentials::Password(password)),
        }
    }

    /// Open and authenticate a new session
    ///
    /// # Errors
    /// Returns `ExecError::ConnectionFailed`, `ExecError::AuthenticationFailed`,
    /// `ExecError::SshKeyError` or `ExecError::ConfigError`
    #[instrument(skip(self), fields(host = %self.config.host))]
    pub async fn open(&self) -> Result<SshSession, ExecError> {
        let conn = &self.config;
        let credentials = self.credentials()?;

        info!(
            host = %conn.host,
            port = conn.port,
            user = %conn.user,
            "connecting to SSH"
        );

        let client_config = Arc::new(client::Config::default());
        let handler = SshClientHandler {
            host: conn.host.clone(),
            port: conn.port,
            strict: conn.strict_host_key_checking,
        };

        let connecting = client::connect(client_config, (&conn.host[..], conn.port), handler);
        let connected = match conn.connect_timeout() {
            Some(limit) => timeout(limit, connecting).await.map_err(|_| {
                ExecError::ConnectionFailed(format!("timed out after {limit:?}"))
            })?,
            None => connecting.await,
        };
        let mut handle = connected.map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        if let Err(e) = authenticate(&mut handle, &conn.user, credentials).await {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await;
            return Err(e);
        }

        info!(host = %conn.host, "SSH connected and authenticated");

        Ok(SshSession {
            handle: Some(handle),
            host: conn.host.clone(),
        })
    }
}

async fn authenticate(
    handle: &mut client::Handle<SshClientHandler>,
    user: &str,
    credentials: Credentials,
) -> Result<(), ExecError> {
    let auth_res = match credentials {
        Credentials::Key(key) => {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
        }
        Credentials::Password(password) => handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?,
    };

    if !auth_res.success() {
        return Err(ExecError::AuthenticationFailed(format!(
            "server rejected credentials for {user}"
        )));
    }

    Ok(())
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, ExecError> {
        Ok(Box::new(self.open().await?))
    }

    fn escalate(&self) -> bool {
        self.config.escalate
    }

    fn target(&self) -> String {
        format!("{}@{}:{}", self.config.user, self.config.host, self.config.port)
    }
}

/// One live SSH session
pub struct SshSession {
    handle: Option<client::Handle<SshClientHandler>>,
    host: String,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

#[async_trait]
impl Session for SshSession {
    #[instrument(skip(self, cmd), fields(host = %self.host))]
    async fn exec(&mut self, cmd: &str) -> Result<CommandResult, ExecError> {
        let session = self.handle.as_mut().ok_or(ExecError::NotConnected)?;

        debug!(command = %cmd, "executing remote command");

        let start = Instant::now();

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // exit-status may arrive after EOF, so drain until the channel closes
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = exit_status.cast_signed();
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(session) = self.handle.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.host, "SSH disconnected");
        }
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let Some(session) = self.handle.take() else {
            return;
        };

        // cancelled mid-command: disconnect in the background when a runtime is around
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                debug!(host = %self.host, "SSH session dropped without close, disconnecting");
                let host = self.host.clone();
                rt.spawn(async move {
                    if let Err(e) = session
                        .disconnect(Disconnect::ByApplication, "", "English")
                        .await
                    {
                        debug!(host = %host, error = %e, "background disconnect failed");
                    }
                });
            }
            Err(_) => {
                warn!(host = %self.host, "SSH session dropped without close");
            }
        }
    }
}
