//! The running monitor: wiring, status reports and shutdown.

use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info};
use tokio::sync::Semaphore;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::connector::{Connect, SshConnector};
use crate::error::Result;
use crate::manager::TaskManager;
use crate::poller::DevicePoller;
use crate::runner::PollPipeline;
use crate::saver::ConfigSaver;
use crate::status::StatusTracker;
use crate::watcher::FileWatcher;

/// One independent monitor instance.
///
/// All shared state (status, snapshot bookkeeping, session gate) is owned
/// here, so several monitors can run side by side.
pub struct Monitor {
    config: MonitorConfig,
    manager: Arc<TaskManager>,
    status: Arc<Mutex<StatusTracker>>,
    saver: Arc<ConfigSaver>,
}

impl Monitor {
    /// Build a monitor that connects over SSH.
    pub async fn new(config: MonitorConfig) -> Result<Self> {
        let connector = Arc::new(SshConnector::new(config.ssh_options()));
        Self::with_connector(config, connector).await
    }

    /// Build a monitor around any [`Connect`] implementation.
    pub async fn with_connector(config: MonitorConfig, connector: Arc<dyn Connect>) -> Result<Self> {
        config.validate()?;

        let saver = Arc::new(ConfigSaver::open(&config.snapshot_dir, &config.snapshot_extension).await?);
        let status = Arc::new(Mutex::new(StatusTracker::new()));
        let poller = DevicePoller::new(
            connector,
            Arc::new(config.platforms()),
            Arc::new(Semaphore::new(config.max_concurrent_sessions)),
            config.connect_timeout,
            config.command_timeout,
        );
        let pipeline = Arc::new(PollPipeline::new(poller, status.clone(), saver.clone()));
        let manager = Arc::new(TaskManager::new(
            &config.credentials_path,
            pipeline,
            config.poll_interval,
        ));

        Ok(Self {
            config,
            manager,
            status,
            saver,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn status(&self) -> &Arc<Mutex<StatusTracker>> {
        &self.status
    }

    pub fn saver(&self) -> &Arc<ConfigSaver> {
        &self.saver
    }

    /// Current status report.
    pub fn report(&self) -> String {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .report()
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Reconciles once at startup, then on every change of the credentials
    /// file. On shutdown, one-shot polls are aborted, periodic workers are
    /// stopped and joined, and a final report is logged.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Monitoring devices from {} (max {} sessions, poll every {:?})",
            self.config.credentials_path.display(),
            self.config.max_concurrent_sessions,
            self.config.poll_interval
        );

        let mut watcher = FileWatcher::new(&self.config.credentials_path, self.config.watch_interval);
        watcher.add_observer(self.manager.clone());

        let watch = async {
            // Fingerprint first: edits during the startup run must trigger
            // another reconciliation.
            let baseline = watcher.baseline().await;
            if let Err(e) = self.manager.reconcile().await {
                error!("Initial reconciliation failed, starting with no devices: {e}");
            }
            watcher.watch(baseline, shutdown.clone()).await;
        };
        let stop_one_shots = async {
            shutdown.cancelled().await;
            info!("Shutting down");
            self.manager.cancel_one_shots();
        };

        tokio::join!(watch, self.report_loop(&shutdown), stop_one_shots);

        self.manager.shutdown().await;
        info!("Final status:\n{}", self.report());
    }

    async fn report_loop(&self, shutdown: &CancellationToken) {
        let period = self.config.report_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => info!("\n{}", self.report()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::{ConfigError, Error};
    use crate::testing::{Script, ScriptedConnector};

    fn config(dir: &tempfile::TempDir) -> MonitorConfig {
        MonitorConfig::default()
            .with_credentials_path(dir.path().join("credentials.yaml"))
            .with_snapshot_dir(dir.path().join("configs"))
            .with_poll_interval(Duration::from_millis(50))
            .with_watch_interval(Duration::from_millis(20))
            .with_report_interval(Duration::from_millis(100))
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::replying("cfg"));
        let result = Monitor::with_connector(config(&dir).with_max_concurrent_sessions(0), connector).await;

        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_reload_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("credentials.yaml");
        std::fs::write(
            &credentials,
            "devices:\n  - type: cisco\n    watch: on\n    credentials: {host: r1, username: u, password: p}\n",
        )
        .unwrap();

        let connector = Arc::new(ScriptedConnector::replying("hostname r1\n"));
        connector.set_script("r2", Script::Refuse);
        let monitor = Arc::new(Monitor::with_connector(config(&dir), connector.clone()).await.unwrap());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let monitor = monitor.clone();
            let shutdown = shutdown.clone();
            async move { monitor.run(shutdown).await }
        });

        eventually(|| connector.attempts_for("r1") >= 3).await;
        assert_eq!(monitor.saver().snapshots("r1").await.unwrap().len(), 1);

        // Swap r1 for a one-shot r2.
        std::fs::write(
            &credentials,
            "devices:\n  - type: cisco\n    credentials: {host: r2, username: u, password: p}\n",
        )
        .unwrap();
        eventually(|| monitor.status().lock().unwrap().get("r2").is_some()).await;

        shutdown.cancel();
        task.await.unwrap();

        let r1_polls = connector.attempts_for("r1");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.attempts_for("r1"), r1_polls);
        assert_eq!(connector.attempts_for("r2"), 1);

        let report = monitor.report();
        assert!(report.contains("r1:"));
        assert!(report.contains("r2:\n  Succeeded: 0, Failed: 1"));
        assert!(report.contains("Last success: never"));
    }

    #[tokio::test]
    async fn test_edit_during_startup_is_reconciled() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("credentials.yaml");
        let slow = "devices:\n  - type: cisco\n    credentials: {host: slow, username: u, password: p}\n";
        std::fs::write(&credentials, slow).unwrap();

        let connector = Arc::new(
            ScriptedConnector::replying("cfg").with_run_delay(Duration::from_millis(300)),
        );
        let monitor = Arc::new(Monitor::with_connector(config(&dir), connector.clone()).await.unwrap());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let monitor = monitor.clone();
            let shutdown = shutdown.clone();
            async move { monitor.run(shutdown).await }
        });

        // Still inside the startup one-shot poll of "slow".
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connector.attempts_for("slow"), 1);
        std::fs::write(
            &credentials,
            format!("{slow}  - type: cisco\n    credentials: {{host: added, username: u, password: p}}\n"),
        )
        .unwrap();

        eventually(|| connector.attempts_for("added") == 1).await;

        shutdown.cancel();
        task.await.unwrap();
    }
}
