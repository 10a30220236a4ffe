//! Snapshot store: writes a configuration only when it changed.
//!
//! Snapshots are plain files in one directory, one file per capture,
//! never rewritten or deleted. The latest snapshot of a host is the one
//! this saver wrote last; for hosts it has not written yet (a fresh
//! process) the directory is scanned and names are ordered by capture
//! stamp and sequence.

pub mod diff;
pub mod naming;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use log::{debug, info, warn};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::StorageError;

pub use diff::DiffLine;

/// Change-detecting snapshot writer.
#[derive(Debug)]
pub struct ConfigSaver {
    dir: PathBuf,
    extension: String,
    /// Last file written per host, in write order.
    latest: Mutex<HashMap<String, PathBuf>>,
}

impl ConfigSaver {
    /// Open (creating if needed) the snapshot directory.
    pub async fn open(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::new(&dir, e))?;
        Ok(Self {
            dir,
            extension: extension.into(),
            latest: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `config` as a new snapshot of `host` unless it equals the
    /// latest one. Returns whether a file was written.
    pub async fn save_if_changed(&self, host: &str, config: &str) -> Result<bool, StorageError> {
        let previous = self.latest_content(host).await?;

        if let Some(previous) = &previous {
            if previous.as_slice() == config.as_bytes() {
                debug!("{host}: configuration unchanged");
                return Ok(false);
            }
            if !previous.is_empty() {
                let previous = String::from_utf8_lossy(previous);
                let diff = diff::line_diff(&previous, config);
                let (added, removed) = diff::stats(&diff);
                info!(
                    "{host}: configuration changed (+{added} -{removed})\n{}",
                    diff::render(&diff).trim_end()
                );
            }
        }

        let path = self.write_snapshot(host, config).await?;
        self.remember(host, path.clone());
        info!("{host}: saved snapshot {}", path.display());
        Ok(true)
    }

    /// Path of the most recently written snapshot of `host`.
    pub async fn latest(&self, host: &str) -> Result<Option<PathBuf>, StorageError> {
        if let Some(path) = self.remembered(host) {
            return Ok(Some(path));
        }
        Ok(self.snapshots(host).await?.pop())
    }

    /// All snapshots of `host` found on disk, oldest first.
    pub async fn snapshots(&self, host: &str) -> Result<Vec<PathBuf>, StorageError> {
        let prefix = naming::sanitize_host(host);
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StorageError::new(&self.dir, e))?;

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::new(&self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(key) = naming::parse(file_name, &prefix, &self.extension) {
                found.push((key, entry.path()));
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    async fn latest_content(&self, host: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(path) = self.latest(host).await? else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{host}: latest snapshot {} disappeared", path.display());
                self.forget(host);
                Ok(None)
            }
            Err(e) => Err(StorageError::new(path, e)),
        }
    }

    async fn write_snapshot(&self, host: &str, config: &str) -> Result<PathBuf, StorageError> {
        let prefix = naming::sanitize_host(host);
        let stamp = naming::stamp(Local::now());
        let mut seq = 0;

        loop {
            let path = self
                .dir
                .join(naming::file_name(&prefix, &stamp, seq, &self.extension));

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => {
                    persist(file, &path, config.as_bytes()).await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => seq += 1,
                Err(e) => return Err(StorageError::new(path, e)),
            }
        }
    }

    fn remembered(&self, host: &str) -> Option<PathBuf> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }

    fn remember(&self, host: &str, path: PathBuf) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_string(), path);
    }

    fn forget(&self, host: &str) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(host);
    }
}

/// Write `content` to a freshly created snapshot file. On failure the file
/// is removed so a partial capture never becomes the latest snapshot.
async fn persist<W>(mut file: W, path: &Path, content: &[u8]) -> Result<(), StorageError>
where
    W: AsyncWrite + Unpin,
{
    let written = match file.write_all(content).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    let Err(e) = written else {
        return Ok(());
    };

    drop(file);
    if let Err(cleanup) = tokio::fs::remove_file(path).await {
        warn!("Cannot remove partial snapshot {}: {}", path.display(), cleanup);
    }
    Err(StorageError::new(path, e))
}
