//! Reconciliation of the device registry with running work.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::registry::{self, DeviceCredential, TaskQueue};
use crate::runner::{OneShotRunner, PeriodicRunner, PollPipeline};
use crate::watcher::ChangeObserver;

/// Counts from one successful reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Devices in the registry.
    pub devices: usize,
    /// One-shot devices polled.
    pub one_shot: usize,
    /// One-shot polls that failed.
    pub one_shot_failures: usize,
    /// Periodic workers running afterwards.
    pub periodic: usize,
}

/// Split devices into (one-shot, periodic) queues by their `watch` flag.
pub fn partition(devices: impl IntoIterator<Item = DeviceCredential>) -> (TaskQueue, TaskQueue) {
    let mut one_shot = TaskQueue::new();
    let mut periodic = TaskQueue::new();
    for device in devices {
        if device.watch() {
            periodic.push(device);
        } else {
            one_shot.push(device);
        }
    }
    (one_shot, periodic)
}

/// Brings the runners in line with the credentials file.
///
/// Reconciliations are serialized. A registry that fails to load leaves
/// everything as it was.
pub struct TaskManager {
    credentials_path: PathBuf,
    one_shot: OneShotRunner,
    periodic: PeriodicRunner,
    /// Devices of the last registry that loaded.
    current: Mutex<Vec<DeviceCredential>>,
}

impl TaskManager {
    pub fn new(credentials_path: impl Into<PathBuf>, pipeline: Arc<PollPipeline>, poll_interval: Duration) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            one_shot: OneShotRunner::new(pipeline.clone()),
            periodic: PeriodicRunner::new(pipeline, poll_interval),
            current: Mutex::new(Vec::new()),
        }
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    pub fn periodic(&self) -> &PeriodicRunner {
        &self.periodic
    }

    /// Reload the registry, poll one-shot devices and restart periodic
    /// workers.
    ///
    /// Returns after the one-shot batch finished and the new periodic
    /// workers were started.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let mut current = self.current.lock().await;

        let devices = registry::load(&self.credentials_path).await?;
        *current = devices.clone();

        let total = devices.len();
        let (one_shot, periodic) = partition(devices);
        info!(
            "Reconciling {} device(s): {} one-shot, {} periodic",
            total,
            one_shot.len(),
            periodic.len()
        );

        let one_shot_count = one_shot.len();
        let (results, ()) = tokio::join!(
            self.one_shot.run(one_shot),
            self.periodic.restart(periodic)
        );

        Ok(ReconcileSummary {
            devices: total,
            one_shot: one_shot_count,
            one_shot_failures: results.iter().filter(|r| !r.is_success()).count(),
            periodic: self.periodic.live_hosts().await.len(),
        })
    }

    /// Hosts of the last registry that loaded.
    pub async fn hosts(&self) -> Vec<String> {
        self.current
            .lock()
            .await
            .iter()
            .map(|device| device.host().to_string())
            .collect()
    }

    /// Abort in-flight one-shot polls.
    pub fn cancel_one_shots(&self) {
        self.one_shot.cancel_all();
    }

    /// Abort one-shot polls and stop every periodic worker.
    pub async fn shutdown(&self) {
        self.one_shot.cancel_all();
        self.periodic.stop_all().await;
    }
}

#[async_trait]
impl ChangeObserver for TaskManager {
    async fn on_change(&self, path: &Path) {
        if let Err(e) = self.reconcile().await {
            error!(
                "Reconciliation with {} failed, keeping current devices: {}",
                path.display(),
                e
            );
        }
    }
}
