//! # confpoll
//!
//! Polls network devices over SSH for their running configuration and
//! keeps a history of every change.
//!
//! The device list comes from a YAML credentials file that may change
//! while the monitor runs. Devices marked `watch` get a long-lived worker
//! that polls on a fixed interval; all others are polled once per
//! reconciliation. A new snapshot file is written only when a device's
//! configuration differs from the last one stored.
//!
//! ## Features
//!
//! - Async SSH sessions via russh, direct or through one jump host
//! - One bound on open sessions across all polling work
//! - Reconciliation on credentials file changes without a restart
//! - Change-only snapshot history with line diffs in the log
//! - Per-device success/failure accounting and periodic status reports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use confpoll::{Monitor, MonitorConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), confpoll::Error> {
//!     let config = MonitorConfig::default()
//!         .with_credentials_path("credentials/credentials.yaml")
//!         .with_max_concurrent_sessions(20);
//!
//!     let monitor = Monitor::new(config).await?;
//!     let shutdown = CancellationToken::new();
//!     monitor.run(shutdown).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod platform;
pub mod poller;
pub mod registry;
pub mod runner;
pub mod saver;
pub mod status;
pub mod transport;
pub mod watcher;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{MonitorConfig, Settings};
pub use connector::{Connect, Connector, SshConnector};
pub use error::{Error, Result};
pub use manager::{ReconcileSummary, TaskManager};
pub use monitor::Monitor;
pub use platform::{PlatformDefinition, PlatformRegistry};
pub use poller::{DevicePoller, PollOutcome, PollResult};
pub use registry::{DeviceCredential, JumpHost, TaskQueue};
pub use runner::{OneShotRunner, PeriodicRunner, PollPipeline, WorkerState};
pub use saver::ConfigSaver;
pub use status::{DeviceStatus, StatusTracker};
pub use transport::{HostKeyVerification, Session, SshConfig, SshOptions};
pub use watcher::{ChangeObserver, FileWatcher};
