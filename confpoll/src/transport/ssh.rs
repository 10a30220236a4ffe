//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::BytesMut;
use log::{debug, trace, warn};
use russh::ChannelMsg;
use russh::client::{self, Handle};
use russh::keys::PublicKey;
use secrecy::ExposeSecret;

use super::config::{HostKeyVerification, SshConfig};
use super::{CommandOutput, Session};
use crate::error::{Result, TransportError};

type HostKeyError = Arc<Mutex<Option<TransportError>>>;

/// SSH transport wrapping a russh client session.
///
/// A transport opened through a jump host owns that hop; disconnecting
/// the transport hangs up the target session first and then every hop
/// behind it.
pub struct SshTransport {
    /// The russh session handle (`None` once disconnected).
    session: Option<Handle<SshHandler>>,

    /// Configuration used for this connection.
    config: SshConfig,

    /// The hop this session was tunnelled through.
    jump: Option<Box<SshTransport>>,
}

impl SshTransport {
    /// Connect directly to the SSH server and authenticate.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let host_key_error = HostKeyError::default();
        let handler = SshHandler::new(&config, host_key_error.clone());

        debug!("connecting to {}", config.socket_addr());
        let mut session = client::connect(
            Self::client_config(&config),
            (config.host.as_str(), config.port),
            handler,
        )
        .await
        .map_err(|e| Self::connect_error(&config, &host_key_error, e))?;

        Self::authenticate(&mut session, &config).await?;

        Ok(Self {
            session: Some(session),
            config,
            jump: None,
        })
    }

    /// Open a session to `config.host` tunnelled through an established hop.
    ///
    /// The returned transport takes ownership of `jump`. If the tunnelled
    /// session cannot be established the hop is disconnected before the
    /// error is returned.
    pub async fn connect_via(mut jump: SshTransport, config: SshConfig) -> Result<Self> {
        match Self::tunnel(&jump, &config).await {
            Ok(session) => Ok(Self {
                session: Some(session),
                config,
                jump: Some(Box::new(jump)),
            }),
            Err(e) => {
                if let Err(close_err) = jump.disconnect().await {
                    warn!(
                        "failed to release jump host {}: {}",
                        jump.config.socket_addr(),
                        close_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn tunnel(jump: &SshTransport, config: &SshConfig) -> Result<Handle<SshHandler>> {
        let hop = jump.handle()?;

        debug!(
            "tunnelling to {} through {}",
            config.socket_addr(),
            jump.config.socket_addr()
        );
        let channel = hop
            .channel_open_direct_tcpip(
                config.host.clone(),
                u32::from(config.port),
                "127.0.0.1",
                0,
            )
            .await
            .map_err(TransportError::Ssh)?;

        let host_key_error = HostKeyError::default();
        let handler = SshHandler::new(config, host_key_error.clone());
        let mut session =
            client::connect_stream(Self::client_config(config), channel.into_stream(), handler)
                .await
                .map_err(|e| Self::connect_error(config, &host_key_error, e))?;

        Self::authenticate(&mut session, config).await?;
        Ok(session)
    }

    /// Run one command on a fresh exec channel and collect its output.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let session = self.handle()?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .exec(true, command)
            .await
            .map_err(TransportError::Ssh)?;

        let mut stdout = BytesMut::with_capacity(16 * 1024);
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    trace!("{}: {} bytes of output", self.config.host, data.len());
                    stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, .. } => {
                    trace!(
                        "{}: stderr: {}",
                        self.config.host,
                        String::from_utf8_lossy(&data).trim_end()
                    );
                }
                ChannelMsg::ExitStatus { exit_status: code } => {
                    exit_status = Some(code);
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            exit_status,
        })
    }

    /// Disconnect this session and every hop behind it.
    ///
    /// Every hop is hung up even if an earlier one fails; the first error
    /// is returned.
    pub async fn disconnect(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(session) = self.session.take() {
            if let Err(e) = hang_up(session).await {
                first_error.get_or_insert(e);
            }
        }

        let mut next = self.jump.take();
        while let Some(mut hop) = next {
            if let Some(session) = hop.session.take() {
                if let Err(e) = hang_up(session).await {
                    first_error.get_or_insert(e);
                }
            }
            next = hop.jump.take();
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn handle(&self) -> Result<&Handle<SshHandler>> {
        self.session
            .as_ref()
            .ok_or_else(|| TransportError::Disconnected.into())
    }

    fn client_config(config: &SshConfig) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: Some(config.inactivity_timeout),
            ..Default::default()
        })
    }

    fn connect_error(
        config: &SshConfig,
        host_key_error: &HostKeyError,
        error: russh::Error,
    ) -> TransportError {
        // If check_server_key stored a detailed error, use that instead
        // of the generic russh::Error::UnknownKey
        if let Some(hk_err) = host_key_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return hk_err;
        }
        match error {
            russh::Error::IO(source) => TransportError::ConnectionFailed {
                host: config.host.clone(),
                port: config.port,
                source,
            },
            other => TransportError::Ssh(other),
        }
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = session
            .authenticate_password(&config.username, config.password.expose_secret())
            .await
            .map_err(TransportError::Ssh)?
            .success();

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }
}

async fn hang_up(session: Handle<SshHandler>) -> std::result::Result<(), TransportError> {
    session
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
        .map_err(TransportError::Ssh)
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!(
                "SSH session to {} dropped without disconnect",
                self.config.socket_addr()
            );
        }
    }
}

#[async_trait]
impl Session for SshTransport {
    async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        let output = self.exec(command).await?;
        if output.exited_nonzero() {
            return Err(TransportError::CommandFailed {
                command: command.to_string(),
                exit_status: output.exit_status.unwrap_or_default(),
            }
            .into());
        }
        Ok(output)
    }

    async fn close(&mut self) -> Result<()> {
        self.disconnect().await
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Stores a detailed host-key error so connect() can surface it
    /// instead of the generic russh::Error::UnknownKey.
    host_key_error: HostKeyError,
}

impl SshHandler {
    fn new(config: &SshConfig, host_key_error: HostKeyError) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error,
        }
    }

    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found,
    /// `Err(TransportError::HostKeyChanged)` if key changed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        *self
            .host_key_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    // Unknown host: learn the key
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key for {}: {}", self.host, e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}
