//! confpoll command-line entry point.
//!
//! ```bash
//! confpoll --credentials credentials/credentials.yaml --max-sessions 20
//! RUST_LOG=debug confpoll --settings /etc/confpoll/settings.yaml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use confpoll::{Error, HostKeyVerification, Monitor, MonitorConfig, Settings};

/// Poll network devices over SSH and keep a history of their configuration.
#[derive(Debug, Parser)]
#[command(name = "confpoll", version, about)]
struct Cli {
    /// YAML settings file; flags below override its values
    #[arg(long, env = "CONFPOLL_SETTINGS")]
    settings: Option<PathBuf>,

    /// Credentials file with the device list
    #[arg(short, long, env = "CONFPOLL_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Directory for configuration snapshots
    #[arg(short = 'o', long, env = "CONFPOLL_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Maximum simultaneously open device sessions
    #[arg(short = 'j', long)]
    max_sessions: Option<usize>,

    /// Seconds between polls of a watched device
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Command timeout in seconds
    #[arg(long)]
    command_timeout: Option<u64>,

    /// Seconds between status reports
    #[arg(long)]
    report_interval: Option<u64>,

    /// Host key checking: strict, accept-new or disabled
    #[arg(long)]
    host_key_verification: Option<HostKeyVerification>,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    #[arg(long)]
    known_hosts: Option<PathBuf>,
}

impl Cli {
    async fn into_config(self) -> Result<MonitorConfig, Error> {
        let mut config = MonitorConfig::default();
        if let Some(path) = &self.settings {
            config = Settings::load(path).await?.apply(config)?;
        }

        if let Some(path) = self.credentials {
            config.credentials_path = path;
        }
        if let Some(dir) = self.snapshot_dir {
            config.snapshot_dir = dir;
        }
        if let Some(limit) = self.max_sessions {
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
        if let Some(secs) = self.report_interval {
            config.report_interval = Duration::from_secs(secs);
        }
        if let Some(mode) = self.host_key_verification {
            config.host_key_verification = mode;
        }
        if let Some(path) = self.known_hosts {
            config.known_hosts_path = Some(path);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info,russh=warn"))
        .init();

    let cli = Cli::parse();

    let monitor = match cli.into_config().await {
        Ok(config) => Monitor::new(config).await,
        Err(e) => Err(e),
    };
    let monitor = match monitor {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received");
                    shutdown.cancel();
                }
                Err(e) => error!("Cannot listen for Ctrl-C: {e}"),
            }
        }
    });

    monitor.run(shutdown).await;
    ExitCode::SUCCESS
}
