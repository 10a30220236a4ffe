//! Runners that turn device queues into polls.
//!
//! Both runners drive every poll through one [`PollPipeline`]: poll the
//! device, record the result in the status tracker, and hand a captured
//! configuration to the snapshot store. The pipeline's poller carries the
//! session gate, so one pipeline shared by both runners gives one bound
//! on open sessions for the whole monitor.

mod oneshot;
mod periodic;

pub use oneshot::OneShotRunner;
pub use periodic::{PeriodicRunner, WorkerState};

use std::sync::{Arc, Mutex, PoisonError};

use log::error;

use crate::poller::{DevicePoller, PollResult};
use crate::registry::DeviceCredential;
use crate::saver::ConfigSaver;
use crate::status::StatusTracker;

/// Poll, then record and persist the result.
pub struct PollPipeline {
    poller: DevicePoller,
    status: Arc<Mutex<StatusTracker>>,
    saver: Arc<ConfigSaver>,
}

impl PollPipeline {
    pub fn new(poller: DevicePoller, status: Arc<Mutex<StatusTracker>>, saver: Arc<ConfigSaver>) -> Self {
        Self {
            poller,
            status,
            saver,
        }
    }

    /// Run one poll for `device` through to status and storage.
    ///
    /// Storage failures are logged; the poll result stands.
    pub async fn process(&self, device: &DeviceCredential) -> PollResult {
        let result = self.poller.poll(device).await;

        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(&result);

        if let Some(config) = result.config() {
            if let Err(e) = self.saver.save_if_changed(&result.host, config).await {
                error!("{}: failed to store snapshot: {}", result.host, e);
            }
        }

        result
    }

    pub fn poller(&self) -> &DevicePoller {
        &self.poller
    }

    pub fn status(&self) -> &Arc<Mutex<StatusTracker>> {
        &self.status
    }

    pub fn saver(&self) -> &Arc<ConfigSaver> {
        &self.saver
    }
}
