//! SSH transport layer wrapping russh.
//!
//! This module provides the low-level session management: connection
//! setup, authentication, tunnelling through a jump host, and running a
//! single command on an exec channel.

pub mod config;
mod ssh;

use async_trait::async_trait;

pub use config::{HostKeyVerification, SshConfig, SshOptions};
pub use ssh::SshTransport;

use crate::error::Result;

/// Output captured from one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything the command wrote to standard output.
    pub stdout: String,

    /// Exit status reported by the server, if it sent one.
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Whether the server reported a nonzero exit status.
    pub fn exited_nonzero(&self) -> bool {
        matches!(self.exit_status, Some(code) if code != 0)
    }
}

/// An authenticated remote shell session.
///
/// `close` must release every resource the session holds, including any
/// intermediate hop it was tunnelled through. Closing twice is a no-op.
#[async_trait]
pub trait Session: Send {
    /// Run one command and capture its standard output.
    async fn run(&mut self, command: &str) -> Result<CommandOutput>;

    /// Disconnect the session.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        let ok = CommandOutput {
            stdout: "x".into(),
            exit_status: Some(0),
        };
        let missing = CommandOutput::default();
        let failed = CommandOutput {
            stdout: String::new(),
            exit_status: Some(1),
        };
        assert!(!ok.exited_nonzero());
        assert!(!missing.exited_nonzero());
        assert!(failed.exited_nonzero());
    }
}
