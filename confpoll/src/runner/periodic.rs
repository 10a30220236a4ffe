//! Long-lived workers for watched devices.
//!
//! Each watched device gets one worker task that polls, sleeps for the
//! poll interval, and checks its cancellation token once per cycle. A
//! poll already in progress always runs to completion; only the sleep
//! is cut short by a stop request.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::PollPipeline;
use crate::registry::{DeviceCredential, TaskQueue};

/// Lifecycle of a periodic worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, not yet scheduled.
    Idle,
    /// Looping.
    Running,
    /// Cancellation requested; finishing the current cycle.
    StopRequested,
    /// Loop exited.
    Stopped,
}

struct Worker {
    cancel: CancellationToken,
    state: Arc<watch::Sender<WorkerState>>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn request_stop(&self) {
        self.state.send_if_modified(|state| match state {
            WorkerState::Idle | WorkerState::Running => {
                *state = WorkerState::StopRequested;
                true
            }
            WorkerState::StopRequested | WorkerState::Stopped => false,
        });
        self.cancel.cancel();
    }
}

/// Owns one worker per watched device.
///
/// Workers are keyed by host. There is never more than one worker per
/// host: [`PeriodicRunner::restart`] joins every old worker before it
/// starts the new set.
pub struct PeriodicRunner {
    pipeline: Arc<PollPipeline>,
    interval: Duration,
    workers: Mutex<IndexMap<String, Worker>>,
}

impl PeriodicRunner {
    pub fn new(pipeline: Arc<PollPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            workers: Mutex::new(IndexMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start a worker for every device in `queue`.
    ///
    /// A host that already has a worker is skipped.
    pub async fn start(&self, queue: TaskQueue) {
        let mut workers = self.workers.lock().await;
        self.spawn_workers(&mut workers, queue);
    }

    /// Stop and join every worker, then start workers for `queue`.
    pub async fn restart(&self, queue: TaskQueue) {
        let mut workers = self.workers.lock().await;
        stop_workers(&mut workers).await;
        self.spawn_workers(&mut workers, queue);
    }

    /// Stop and join every worker.
    pub async fn stop_all(&self) {
        let mut workers = self.workers.lock().await;
        stop_workers(&mut workers).await;
    }

    /// Hosts whose worker is still running, in start order.
    pub async fn live_hosts(&self) -> Vec<String> {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|(_, worker)| !worker.handle.is_finished())
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Current state of every worker.
    pub async fn states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .lock()
            .await
            .iter()
            .map(|(host, worker)| (host.clone(), *worker.state.borrow()))
            .collect()
    }

    fn spawn_workers(&self, workers: &mut IndexMap<String, Worker>, queue: TaskQueue) {
        for device in queue {
            let host = device.host().to_string();
            if workers.contains_key(&host) {
                warn!("{host}: already has a periodic worker, skipping duplicate entry");
                continue;
            }

            let cancel = CancellationToken::new();
            let (state, _) = watch::channel(WorkerState::Idle);
            let state = Arc::new(state);
            let handle = tokio::spawn(run_worker(
                self.pipeline.clone(),
                device,
                self.interval,
                cancel.clone(),
                state.clone(),
            ));
            workers.insert(
                host,
                Worker {
                    cancel,
                    state,
                    handle,
                },
            );
        }

        if !workers.is_empty() {
            info!(
                "{} periodic worker(s) running every {:?}",
                workers.len(),
                self.interval
            );
        }
    }
}

async fn stop_workers(workers: &mut IndexMap<String, Worker>) {
    if workers.is_empty() {
        return;
    }
    debug!("Stopping {} periodic worker(s)", workers.len());

    let old: Vec<(String, Worker)> = workers.drain(..).collect();
    for (_, worker) in &old {
        worker.request_stop();
    }

    let joined = join_all(
        old.into_iter()
            .map(|(host, worker)| async move { (host, worker.handle.await) }),
    )
    .await;

    for (host, result) in joined {
        if let Err(e) = result {
            error!("{host}: periodic worker ended abnormally: {e}");
        }
    }
}

async fn run_worker(
    pipeline: Arc<PollPipeline>,
    device: DeviceCredential,
    interval: Duration,
    cancel: CancellationToken,
    state: Arc<watch::Sender<WorkerState>>,
) {
    state.send_if_modified(|state| {
        let idle = *state == WorkerState::Idle;
        if idle {
            *state = WorkerState::Running;
        }
        idle
    });
    debug!("{}: periodic worker started", device.host());

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let cycle = AssertUnwindSafe(pipeline.process(&device))
            .catch_unwind()
            .await;
        if cycle.is_err() {
            error!("{}: poll panicked, retrying next cycle", device.host());
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    state.send_replace(WorkerState::Stopped);
    debug!("{}: periodic worker stopped", device.host());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, pipeline, Script, ScriptedConnector};

    fn queue(hosts: &[&str]) -> TaskQueue {
        hosts.iter().map(|host| device(host, "cisco", true)).collect()
    }

    async fn runner(
        connector: Arc<ScriptedConnector>,
        dir: &tempfile::TempDir,
    ) -> PeriodicRunner {
        PeriodicRunner::new(pipeline(connector, 4, dir).await, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(Script::Exit(1)));
        let runner = runner(connector.clone(), &dir).await;

        runner.start(queue(&["b"])).await;
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(connector.attempts_for("b"), 3);
        runner.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_matches_new_set() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(Script::Exit(1)));
        let runner = runner(connector.clone(), &dir).await;

        runner.start(queue(&["a", "b"])).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        runner.restart(queue(&["b", "c"])).await;

        assert_eq!(runner.live_hosts().await, vec!["b", "c"]);

        let a_before = connector.attempts_for("a");
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(connector.attempts_for("a"), a_before);
        assert!(connector.attempts_for("c") >= 3);
        runner.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_gives_repeated_host_a_fresh_worker() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(Script::Exit(1)));
        let runner = runner(connector.clone(), &dir).await;

        runner.start(queue(&["b"])).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts_for("b"), 1);

        // The new worker polls right away instead of waiting out the old sleep.
        runner.restart(queue(&["b"])).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts_for("b"), 2);
        assert_eq!(runner.live_hosts().await, vec!["b"]);
        runner.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_poll() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(
            ScriptedConnector::new(Script::Exit(1)).with_run_delay(Duration::from_secs(5)),
        );
        let runner = runner(connector.clone(), &dir).await;

        let started = tokio::time::Instant::now();
        runner.start(queue(&["b"])).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.open_sessions(), 1);

        runner.stop_all().await;

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(connector.open_sessions(), 0);
        assert_eq!(connector.closed_sessions(), 1);
        assert!(runner.live_hosts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_host_gets_one_worker() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(Script::Exit(1)));
        let runner = runner(connector.clone(), &dir).await;

        runner.start(queue(&["a", "a"])).await;
        runner.start(queue(&["a"])).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(runner.live_hosts().await, vec!["a"]);
        assert_eq!(connector.attempts_for("a"), 1);
        runner.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_panicking_poll() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(Script::Panic));
        let runner = runner(connector.clone(), &dir).await;

        runner.start(queue(&["p"])).await;
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(connector.attempts_for("p"), 3);
        assert_eq!(runner.live_hosts().await, vec!["p"]);
        runner.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_states() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(Script::Exit(1)));
        let runner = runner(connector.clone(), &dir).await;

        runner.start(queue(&["a"])).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            runner.states().await,
            vec![("a".to_string(), WorkerState::Running)]
        );

        runner.stop_all().await;
        assert!(runner.states().await.is_empty());
    }
}
