//! One poll: gate, connect, run the config command, close.
//!
//! [`DevicePoller::poll`] is the failure boundary of the crate. Whatever
//! goes wrong for a device (unknown type, refused connection, bad
//! password, timeout, rejected command) comes back as a failed
//! [`PollResult`] for that host, so callers can fan out over many
//! devices without any single one aborting the rest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, warn};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::connector::Connect;
use crate::error::{Error, PlatformError, Result, TransportError};
use crate::platform::PlatformRegistry;
use crate::registry::DeviceCredential;
use crate::transport::Session;

/// What one poll produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Captured configuration text.
    Success { config: String },
    /// Why the poll failed.
    Failure { error: String },
}

/// Result of polling one device, always tagged with the device's host.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub host: String,
    pub outcome: PollOutcome,
    /// When the poll finished.
    pub observed_at: DateTime<Local>,
    /// Wall time from start of the poll (including the gate wait) to finish.
    pub elapsed: Duration,
}

impl PollResult {
    pub fn success(host: impl Into<String>, config: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            host: host.into(),
            outcome: PollOutcome::Success {
                config: config.into(),
            },
            observed_at: Local::now(),
            elapsed,
        }
    }

    pub fn failure(host: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            host: host.into(),
            outcome: PollOutcome::Failure {
                error: error.into(),
            },
            observed_at: Local::now(),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PollOutcome::Success { .. })
    }

    /// The captured configuration, if the poll succeeded.
    pub fn config(&self) -> Option<&str> {
        match &self.outcome {
            PollOutcome::Success { config } => Some(config),
            PollOutcome::Failure { .. } => None,
        }
    }

    /// The failure reason, if the poll failed.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            PollOutcome::Success { .. } => None,
            PollOutcome::Failure { error } => Some(error),
        }
    }
}

/// Executes polls against devices.
///
/// The gate is shared by every poller of one monitor, so the bound on open
/// sessions holds across one-shot and periodic work together. A permit is
/// taken before connecting and returned only after the session is closed.
#[derive(Clone)]
pub struct DevicePoller {
    connector: Arc<dyn Connect>,
    platforms: Arc<PlatformRegistry>,
    gate: Arc<Semaphore>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl DevicePoller {
    pub fn new(
        connector: Arc<dyn Connect>,
        platforms: Arc<PlatformRegistry>,
        gate: Arc<Semaphore>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            platforms,
            gate,
            connect_timeout,
            command_timeout,
        }
    }

    /// The session gate.
    pub fn gate(&self) -> &Arc<Semaphore> {
        &self.gate
    }

    pub fn platforms(&self) -> &PlatformRegistry {
        &self.platforms
    }

    /// Poll one device. Never fails; errors become a failed [`PollResult`].
    pub async fn poll(&self, device: &DeviceCredential) -> PollResult {
        let started = Instant::now();
        let result = self.fetch(device).await;
        let elapsed = started.elapsed();

        match result {
            Ok(config) => {
                debug!(
                    "{}: captured {} bytes in {:?}",
                    device.host(),
                    config.len(),
                    elapsed
                );
                PollResult::success(device.host(), config, elapsed)
            }
            Err(e) => {
                warn!("{}: poll failed: {}", device.host(), e);
                PollResult::failure(device.host(), e.to_string(), elapsed)
            }
        }
    }

    async fn fetch(&self, device: &DeviceCredential) -> Result<String> {
        // Unknown types fail before touching the gate or the network.
        let platform = self.platforms.resolve(device.device_type())?;

        let _permit = self.gate.acquire().await.map_err(|_| Error::Shutdown)?;

        let mut session = timeout(self.connect_timeout, self.connector.connect(device))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        let output = match timeout(self.command_timeout, session.run(&platform.config_command)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.command_timeout).into()),
        };

        self.release(device, &mut *session).await;

        let output = output?;
        if let Some(pattern) = platform.detect_failure(&output.stdout) {
            return Err(PlatformError::CommandRejected {
                command: platform.config_command.clone(),
                pattern: pattern.to_string(),
            }
            .into());
        }

        Ok(output.stdout)
    }

    /// Close the session, bounded by the connect timeout. Failures here
    /// do not change the poll outcome.
    async fn release(&self, device: &DeviceCredential, session: &mut dyn Session) {
        match timeout(self.connect_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("{}: error closing session: {}", device.host(), e),
            Err(_) => warn!("{}: session close timed out", device.host()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, Script, ScriptedConnector};

    fn poller(connector: Arc<ScriptedConnector>, permits: usize) -> DevicePoller {
        DevicePoller::new(
            connector,
            Arc::new(PlatformRegistry::with_builtins()),
            Arc::new(Semaphore::new(permits)),
            Duration::from_secs(30),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_success_captures_output_and_closes() {
        let connector = Arc::new(ScriptedConnector::replying("hostname r1\n"));
        let poller = poller(connector.clone(), 4);

        let result = poller.poll(&device("r1", "cisco", false)).await;

        assert!(result.is_success());
        assert_eq!(result.host, "r1");
        assert_eq!(result.config(), Some("hostname r1\n"));
        assert_eq!(result.error(), None);
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.closed_sessions(), 1);
        assert_eq!(poller.gate().available_permits(), 4);
    }

    #[tokio::test]
    async fn test_unknown_type_fails_without_connecting() {
        let connector = Arc::new(ScriptedConnector::replying("x"));
        let poller = poller(connector.clone(), 4);

        let result = poller.poll(&device("r1", "nosuchos", false)).await;

        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("Unsupported device type 'nosuchos'"));
        assert_eq!(connector.attempts_for("r1"), 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        let connector = Arc::new(ScriptedConnector::new(Script::Refuse));
        let poller = poller(connector.clone(), 4);

        let result = poller.poll(&device("r1", "cisco", false)).await;

        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("Connection failed"));
        assert_eq!(result.config(), None);
        assert_eq!(poller.gate().available_permits(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_failure() {
        let connector = Arc::new(ScriptedConnector::new(Script::ConnectHang));
        let poller = poller(connector.clone(), 1);

        let result = poller.poll(&device("r1", "cisco", false)).await;

        assert!(result.error().unwrap().contains("timed out"));
        assert_eq!(poller.gate().available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout_still_closes_session() {
        let connector = Arc::new(ScriptedConnector::new(Script::RunHang));
        let poller = poller(connector.clone(), 1);

        let result = poller.poll(&device("10.0.0.5", "cisco", false)).await;

        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("timed out after 30s"));
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.closed_sessions(), 1);
        assert_eq!(poller.gate().available_permits(), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let connector = Arc::new(ScriptedConnector::new(Script::Exit(1)));
        let poller = poller(connector.clone(), 4);

        let result = poller.poll(&device("r1", "huawei", false)).await;

        assert!(result.error().unwrap().contains("exited with status 1"));
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_rejected_command_is_failure() {
        let connector = Arc::new(ScriptedConnector::replying(
            "         ^\n% Invalid input detected at '^' marker.\n",
        ));
        let poller = poller(connector.clone(), 4);

        let result = poller.poll(&device("r1", "cisco", false)).await;

        assert!(result.error().unwrap().contains("% Invalid input"));
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_open_sessions() {
        let connector = Arc::new(
            ScriptedConnector::replying("cfg").with_run_delay(Duration::from_millis(50)),
        );
        let poller = poller(connector.clone(), 2);

        let devices: Vec<_> = (0..6)
            .map(|i| device(&format!("r{i}"), "arista", false))
            .collect();
        let results =
            futures_util::future::join_all(devices.iter().map(|d| poller.poll(d))).await;

        assert!(results.iter().all(PollResult::is_success));
        assert_eq!(connector.peak_sessions(), 2);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_closed_gate_fails_poll() {
        let connector = Arc::new(ScriptedConnector::replying("cfg"));
        let poller = poller(connector.clone(), 1);
        poller.gate().close();

        let result = poller.poll(&device("r1", "cisco", false)).await;

        assert_eq!(result.error(), Some("Monitor is shutting down"));
        assert_eq!(connector.attempts_for("r1"), 0);
    }
}
