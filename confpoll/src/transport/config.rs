//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    /// This is the default and matches common SSH client behavior.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For testing and lab use only.
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "yes" => Ok(Self::Strict),
            "accept-new" | "accept_new" => Ok(Self::AcceptNew),
            "disabled" | "no" | "off" => Ok(Self::Disabled),
            other => Err(format!(
                "unknown host key verification mode '{other}' (expected strict, accept-new or disabled)"
            )),
        }
    }
}

/// SSH connection configuration for one hop.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Password for authentication.
    pub password: SecretString,

    /// Inactivity timeout handed to the SSH session.
    pub inactivity_timeout: Duration,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings shared by every hop the connector opens.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Port used when a record does not name one.
    pub default_port: u16,

    /// Inactivity timeout for established sessions.
    pub inactivity_timeout: Duration,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file (`~/.ssh/known_hosts` when `None`).
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            default_port: 22,
            inactivity_timeout: Duration::from_secs(60),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }
}

impl SshOptions {
    /// Build the per-hop config for a host with the given credentials.
    pub fn hop(
        &self,
        host: &str,
        port: Option<u16>,
        username: &str,
        password: &SecretString,
    ) -> SshConfig {
        SshConfig {
            host: host.to_string(),
            port: port.unwrap_or(self.default_port),
            username: username.to_string(),
            password: password.clone(),
            inactivity_timeout: self.inactivity_timeout,
            host_key_verification: self.host_key_verification.clone(),
            known_hosts_path: self.known_hosts_path.clone(),
        }
    }
}
