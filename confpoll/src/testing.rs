//! Scripted stand-ins for SSH used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tokio::sync::Semaphore;

use crate::connector::Connect;
use crate::error::{Result, TransportError};
use crate::platform::PlatformRegistry;
use crate::poller::DevicePoller;
use crate::registry::{self, DeviceCredential};
use crate::runner::PollPipeline;
use crate::saver::ConfigSaver;
use crate::status::StatusTracker;
use crate::transport::{CommandOutput, Session};

/// What a scripted device does when polled.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Print this text and exit 0.
    Reply(String),
    /// Refuse the connection.
    Refuse,
    /// Never finish connecting.
    ConnectHang,
    /// Connect, then never finish the command.
    RunHang,
    /// Exit with this status and no output.
    Exit(u32),
    /// Panic while running the command.
    Panic,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    /// Connection attempts, successful or not.
    pub attempts: AtomicUsize,
    /// Sessions currently open (connected and not yet closed).
    pub open: AtomicUsize,
    /// Highest value `open` ever reached.
    pub peak: AtomicUsize,
    /// Sessions closed.
    pub closed: AtomicUsize,
}

/// A [`Connect`] whose devices follow per-host scripts.
pub(crate) struct ScriptedConnector {
    scripts: Mutex<HashMap<String, Script>>,
    default: Script,
    run_delay: Duration,
    per_host: Mutex<HashMap<String, usize>>,
    pub counters: Arc<Counters>,
}

impl ScriptedConnector {
    pub fn new(default: Script) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            run_delay: Duration::ZERO,
            per_host: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(Script::Reply(text.to_string()))
    }

    /// Make every command take `delay` before answering.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn set_script(&self, host: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(host.to_string(), script);
    }

    /// Connection attempts made for `host`.
    pub fn attempts_for(&self, host: &str) -> usize {
        self.per_host
            .lock()
            .unwrap()
            .get(host)
            .copied()
            .unwrap_or_default()
    }

    pub fn open_sessions(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    pub fn peak_sessions(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connect for ScriptedConnector {
    async fn connect(&self, device: &DeviceCredential) -> Result<Box<dyn Session>> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        *self
            .per_host
            .lock()
            .unwrap()
            .entry(device.host().to_string())
            .or_default() += 1;

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(device.host())
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match script {
            Script::Refuse => {
                return Err(TransportError::ConnectionFailed {
                    host: device.host().to_string(),
                    port: 22,
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ),
                }
                .into());
            }
            Script::ConnectHang => std::future::pending::<()>().await,
            _ => {}
        }

        let now_open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now_open, Ordering::SeqCst);

        Ok(Box::new(ScriptedSession {
            script,
            run_delay: self.run_delay,
            counters: self.counters.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    script: Script,
    run_delay: Duration,
    counters: Arc<Counters>,
    closed: bool,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        match &self.script {
            Script::Reply(text) => Ok(CommandOutput {
                stdout: text.clone(),
                exit_status: Some(0),
            }),
            Script::Exit(code) => Err(TransportError::CommandFailed {
                command: command.to_string(),
                exit_status: *code,
            }
            .into()),
            Script::RunHang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Script::Panic => panic!("scripted panic"),
            Script::Refuse | Script::ConnectHang => unreachable!(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Parse a single device record from inline YAML fields.
pub(crate) fn device(host: &str, device_type: &str, watch: bool) -> DeviceCredential {
    let doc = format!(
        "devices:\n  - type: {device_type}\n    watch: {watch}\n    credentials: {{host: '{host}', username: admin, password: secret}}\n"
    );
    registry::parse(&doc).unwrap().remove(0)
}

/// A pipeline over `connector` with a gate of `permits` sessions,
/// 30 second timeouts and snapshots under `dir`.
pub(crate) async fn pipeline(
    connector: Arc<ScriptedConnector>,
    permits: usize,
    dir: &tempfile::TempDir,
) -> Arc<PollPipeline> {
    let poller = DevicePoller::new(
        connector,
        Arc::new(PlatformRegistry::with_builtins()),
        Arc::new(Semaphore::new(permits)),
        Duration::from_secs(30),
        Duration::from_secs(30),
    );
    let saver = ConfigSaver::open(dir.path().join("configs"), "cfg")
        .await
        .unwrap();
    Arc::new(PollPipeline::new(
        poller,
        Arc::new(Mutex::new(StatusTracker::new())),
        Arc::new(saver),
    ))
}
