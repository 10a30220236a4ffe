//! Error types for confpoll.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for confpoll operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Credentials file errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Device type / command table errors
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Snapshot store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Monitor settings errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The session gate was closed because the monitor is stopping
    #[error("Monitor is shutting down")]
    Shutdown,
}

/// Transport layer errors (SSH connection, authentication, command execution).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// The server presented a key that differs from known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Strict verification and the host is not in known_hosts
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The remote command exited with a nonzero status
    #[error("Command '{command}' exited with status {exit_status}")]
    CommandFailed { command: String, exit_status: u32 },
}

/// Credentials file errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The credentials file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The credentials file is not valid YAML
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The document does not have the expected shape
    #[error("Invalid credentials document: {message}")]
    Format { message: String },

    /// One or more device entries failed validation
    #[error("{0}")]
    Validation(#[from] ValidationError),
}

/// Every problem found across every device entry of one registry load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub problems: Vec<ValidationProblem>,
}

/// Problems of a single device entry, addressed by its position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationProblem {
    /// Zero-based index of the entry in the `devices` list.
    pub index: usize,
    /// Required fields that are absent.
    pub missing: Vec<&'static str>,
    /// Required fields that are present but empty.
    pub empty: Vec<&'static str>,
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} invalid device entr{}",
            self.problems.len(),
            if self.problems.len() == 1 { "y" } else { "ies" }
        )?;
        for problem in &self.problems {
            write!(f, "; {problem}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device #{}:", self.index)?;
        if !self.missing.is_empty() {
            write!(f, " missing fields [{}]", self.missing.join(", "))?;
        }
        if !self.empty.is_empty() {
            if !self.missing.is_empty() {
                write!(f, ",")?;
            }
            write!(f, " empty fields [{}]", self.empty.join(", "))?;
        }
        Ok(())
    }
}

/// Platform/device-type errors.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// No command is known for this device type
    #[error("Unsupported device type '{name}'. Supported types: {supported}")]
    UnknownPlatform { name: String, supported: String },

    /// The device answered with one of the platform's failure patterns
    #[error("Command '{command}' was rejected by the device ({pattern})")]
    CommandRejected { command: String, pattern: String },
}

/// Snapshot store errors.
#[derive(Error, Debug)]
#[error("Snapshot store I/O on {path}: {source}")]
pub struct StorageError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl StorageError {
    pub(crate) fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Monitor settings errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings file could not be read
    #[error("Failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The settings file is not valid YAML or has unknown keys
    #[error("Invalid settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A setting has an unusable value
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type alias using confpoll's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_every_entry() {
        let err = ValidationError {
            problems: vec![
                ValidationProblem {
                    index: 0,
                    missing: vec!["password"],
                    empty: vec![],
                },
                ValidationProblem {
                    index: 2,
                    missing: vec!["host"],
                    empty: vec!["username", "type"],
                },
            ],
        };

        let text = err.to_string();
        assert!(text.starts_with("2 invalid device entries"));
        assert!(text.contains("device #0: missing fields [password]"));
        assert!(text.contains("device #2: missing fields [host], empty fields [username, type]"));
    }

    #[test]
    fn test_validation_error_singular() {
        let err = ValidationError {
            problems: vec![ValidationProblem {
                index: 1,
                missing: vec![],
                empty: vec!["host"],
            }],
        };
        assert_eq!(
            err.to_string(),
            "1 invalid device entry; device #1: empty fields [host]"
        );
    }

    #[test]
    fn test_registry_error_wraps_validation() {
        let err: Error = RegistryError::from(ValidationError { problems: vec![] }).into();
        assert!(matches!(err, Error::Registry(RegistryError::Validation(_))));
    }
}
