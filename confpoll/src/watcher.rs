//! Watches the credentials file and tells observers when it changes.
//!
//! Change detection polls the file's modification time and length every
//! `interval`. Several writes between two checks produce one event, and
//! observers are awaited one after another, so reconciliations never
//! overlap. A missing file is not an error: the watcher keeps checking
//! and reports the file again once it reappears.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

/// Something to run when the watched file changes.
#[async_trait]
pub trait ChangeObserver: Send + Sync {
    async fn on_change(&self, path: &Path);
}

/// What a file looked like at one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

/// Difference between two consecutive checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    Modified,
    Disappeared,
    Reappeared,
}

/// Compare two checks of the same path (`None` = file absent).
pub fn detect_change(previous: Option<Fingerprint>, current: Option<Fingerprint>) -> Change {
    match (previous, current) {
        (Some(a), Some(b)) if a == b => Change::Unchanged,
        (Some(_), Some(_)) => Change::Modified,
        (Some(_), None) => Change::Disappeared,
        (None, Some(_)) => Change::Reappeared,
        (None, None) => Change::Unchanged,
    }
}

pub struct FileWatcher {
    path: PathBuf,
    interval: Duration,
    observers: Vec<Arc<dyn ChangeObserver>>,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ChangeObserver>) {
        self.observers.push(observer);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current fingerprint of the watched file, `None` if it is missing.
    ///
    /// Take it before acting on the file's content and hand it to
    /// [`watch`](Self::watch), so edits made in between are still seen.
    pub async fn baseline(&self) -> Option<Fingerprint> {
        fingerprint(&self.path).await
    }

    /// Watch until `shutdown` is cancelled, comparing the first check
    /// against `baseline`.
    ///
    /// An observer that is running when shutdown is requested is allowed
    /// to finish.
    pub async fn watch(&self, baseline: Option<Fingerprint>, shutdown: CancellationToken) {
        let mut last = baseline;
        if last.is_none() {
            warn!("{} does not exist; waiting for it to appear", self.path.display());
        }
        info!(
            "Watching {} for changes every {:?}",
            self.path.display(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let current = fingerprint(&self.path).await;
            match detect_change(last, current) {
                Change::Unchanged => {}
                Change::Disappeared => warn!(
                    "{} disappeared; keeping the current devices until it returns",
                    self.path.display()
                ),
                Change::Modified | Change::Reappeared => {
                    info!("{} changed, reconciling", self.path.display());
                    self.notify().await;
                }
            }
            last = current;
        }

        debug!("Stopped watching {}", self.path.display());
    }

    async fn notify(&self) {
        for observer in &self.observers {
            observer.on_change(&self.path).await;
        }
    }
}

async fn fingerprint(path: &Path) -> Option<Fingerprint> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Some(Fingerprint {
            modified: meta.modified().ok(),
            len: meta.len(),
        }),
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                debug!("Cannot stat {}: {}", path.display(), e);
            }
            None
        }
    }
}
