//! Monitor settings.
//!
//! [`MonitorConfig`] is what the monitor runs with. It starts from
//! defaults, can be overlaid with a YAML settings file ([`Settings`]),
//! and is finally adjusted by command-line flags in the binary.
//!
//! ```yaml
//! credentials_path: /etc/confpoll/credentials.yaml
//! snapshot_dir: /var/lib/confpoll
//! max_concurrent_sessions: 20
//! poll_interval: 300        # seconds
//! host_key_verification: strict
//! commands:
//!   fortios: show full-configuration
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::platform::PlatformRegistry;
use crate::transport::{HostKeyVerification, SshOptions};

/// Everything the monitor needs to run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Credentials file with the device list.
    pub credentials_path: PathBuf,

    /// Directory holding configuration snapshots.
    pub snapshot_dir: PathBuf,

    /// Snapshot file extension, without the dot.
    pub snapshot_extension: String,

    /// Upper bound on simultaneously open device sessions.
    pub max_concurrent_sessions: usize,

    /// Pause between two polls of a watched device.
    pub poll_interval: Duration,

    /// Bound on establishing (and closing) a session.
    pub connect_timeout: Duration,

    /// Bound on running the config command.
    pub command_timeout: Duration,

    /// How often the credentials file is checked for changes.
    pub watch_interval: Duration,

    /// How often the status report is logged.
    pub report_interval: Duration,

    /// SSH port for records that do not name one.
    pub ssh_port: u16,

    pub host_key_verification: HostKeyVerification,

    /// known_hosts file (`~/.ssh/known_hosts` when `None`).
    pub known_hosts_path: Option<PathBuf>,

    /// Extra or overriding device type → command entries.
    pub commands: BTreeMap<String, String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("credentials/credentials.yaml"),
            snapshot_dir: PathBuf::from("configs"),
            snapshot_extension: "cfg".to_string(),
            max_concurrent_sessions: 10,
            poll_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            watch_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(600),
            ssh_port: 22,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            commands: BTreeMap::new(),
        }
    }
}

impl MonitorConfig {
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    pub fn with_max_concurrent_sessions(mut self, limit: usize) -> Self {
        self.max_concurrent_sessions = limit;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Add or replace the command for a device type.
    pub fn with_command(mut self, device_type: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.insert(device_type.into(), command.into());
        self
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_sessions == 0 {
            return Err(invalid("max_concurrent_sessions", "must be at least 1"));
        }
        let intervals = [
            ("poll_interval", self.poll_interval),
            ("connect_timeout", self.connect_timeout),
            ("command_timeout", self.command_timeout),
            ("watch_interval", self.watch_interval),
            ("report_interval", self.report_interval),
        ];
        for (field, value) in intervals {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.ssh_port == 0 {
            return Err(invalid("ssh_port", "must not be 0"));
        }
        if self.snapshot_extension.is_empty() || self.snapshot_extension.contains(['/', '\\']) {
            return Err(invalid(
                "snapshot_extension",
                "must be a non-empty file extension",
            ));
        }
        if let Some((device_type, _)) = self
            .commands
            .iter()
            .find(|(name, command)| name.trim().is_empty() || command.trim().is_empty())
        {
            return Err(invalid(
                "commands",
                format!("entry '{device_type}' needs a device type and a command"),
            ));
        }
        Ok(())
    }

    /// Built-in platforms plus the configured commands.
    pub fn platforms(&self) -> PlatformRegistry {
        let mut platforms = PlatformRegistry::with_builtins();
        for (device_type, command) in &self.commands {
            platforms.set_command(device_type, command.trim());
        }
        platforms
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            default_port: self.ssh_port,
            host_key_verification: self.host_key_verification.clone(),
            known_hosts_path: self.known_hosts_path.clone(),
            ..SshOptions::default()
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Contents of a settings file. Every key is optional; durations are in
/// seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub credentials_path: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_extension: Option<String>,
    pub max_concurrent_sessions: Option<usize>,
    pub poll_interval: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub command_timeout: Option<u64>,
    pub watch_interval: Option<u64>,
    pub report_interval: Option<u64>,
    pub ssh_port: Option<u16>,
    pub host_key_verification: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

impl Settings {
    /// Read a settings file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let settings = Self::parse(&content)?;
        debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse settings YAML. An empty document means no settings.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Overlay these settings on `config`.
    pub fn apply(self, mut config: MonitorConfig) -> Result<MonitorConfig, ConfigError> {
        if let Some(path) = self.credentials_path {
            config.credentials_path = path;
        }
        if let Some(dir) = self.snapshot_dir {
            config.snapshot_dir = dir;
        }
        if let Some(extension) = self.snapshot_extension {
            config.snapshot_extension = extension.trim_start_matches('.').to_string();
        }
        if let Some(limit) = self.max_concurrent_sessions {
            config.max_concurrent_sessions = limit;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.command_timeout {
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.watch_interval {
            config.watch_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.report_interval {
            config.report_interval = Duration::from_secs(secs);
        }
        if let Some(port) = self.ssh_port {
            config.ssh_port = port;
        }
        if let Some(mode) = self.host_key_verification {
            config.host_key_verification = mode
                .parse()
                .map_err(|reason| invalid("host_key_verification", reason))?;
        }
        if let Some(path) = self.known_hosts_path {
            config.known_hosts_path = Some(path);
        }
        config.commands.extend(self.commands);
        Ok(config)
    }
}
