//! Drain-once runner for devices that are not watched.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use log::{debug, error, info};
use tokio::task::{AbortHandle, JoinSet};

use super::PollPipeline;
use crate::poller::PollResult;
use crate::registry::TaskQueue;

/// Polls every device of a queue once, concurrently.
///
/// Concurrency is bounded by the pipeline's session gate, not by the
/// number of tasks spawned.
pub struct OneShotRunner {
    pipeline: Arc<PollPipeline>,
    in_flight: Mutex<Vec<AbortHandle>>,
}

impl OneShotRunner {
    pub fn new(pipeline: Arc<PollPipeline>) -> Self {
        Self {
            pipeline,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Poll every device in `queue` and wait for all of them.
    ///
    /// Results come back in completion order; each carries its host.
    /// A failed or panicked poll does not affect the others.
    pub async fn run(&self, queue: TaskQueue) -> Vec<PollResult> {
        if queue.is_empty() {
            return Vec::new();
        }
        info!("Polling {} one-shot device(s)", queue.len());

        let mut tasks = JoinSet::new();
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            for device in queue {
                let pipeline = self.pipeline.clone();
                in_flight.push(tasks.spawn(async move {
                    let outcome = AssertUnwindSafe(pipeline.process(&device))
                        .catch_unwind()
                        .await;
                    (device, outcome)
                }));
            }
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(result))) => results.push(result),
                Ok((device, Err(_))) => error!("{}: one-shot poll panicked", device.host()),
                Err(e) if e.is_cancelled() => debug!("One-shot poll cancelled"),
                Err(e) => error!("One-shot poll task failed: {e}"),
            }
        }

        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|handle| !handle.is_finished());

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            "One-shot batch done: {} succeeded, {} failed",
            results.len() - failed,
            failed
        );
        results
    }

    /// Abort every poll still running. Used at shutdown.
    pub fn cancel_all(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.is_empty() {
            debug!("Cancelling {} one-shot poll(s)", in_flight.len());
        }
        for handle in in_flight.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, pipeline, Script, ScriptedConnector};

    #[tokio::test]
    async fn test_every_device_polled_once() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::replying("cfg"));
        connector.set_script("r2", Script::Refuse);
        let runner = OneShotRunner::new(pipeline(connector.clone(), 2, &dir).await);

        let queue: TaskQueue = ["r1", "r2", "r3"]
            .iter()
            .map(|host| device(host, "cisco", false))
            .collect();
        let results = runner.run(queue).await;

        assert_eq!(results.len(), 3);
        for host in ["r1", "r2", "r3"] {
            assert_eq!(connector.attempts_for(host), 1);
            let result = results.iter().find(|r| r.host == host).unwrap();
            assert_eq!(result.is_success(), host != "r2");
        }
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::replying("cfg"));
        let runner = OneShotRunner::new(pipeline(connector.clone(), 2, &dir).await);

        assert!(runner.run(TaskQueue::new()).await.is_empty());
        assert_eq!(connector.counters.attempts.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_poll_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::replying("cfg"));
        connector.set_script("bad", Script::Panic);
        let runner = OneShotRunner::new(pipeline(connector.clone(), 2, &dir).await);

        let queue: TaskQueue = ["good", "bad"]
            .iter()
            .map(|host| device(host, "cisco", false))
            .collect();
        let results = runner.run(queue).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].host, "good");
    }

    #[tokio::test]
    async fn test_cancel_all_stops_in_flight_polls() {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(Script::ConnectHang));
        let runner = Arc::new(OneShotRunner::new(pipeline(connector.clone(), 2, &dir).await));

        let queue: TaskQueue = vec![device("r1", "cisco", false)].into_iter().collect();
        let run = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run(queue).await }
        });

        while connector.attempts_for("r1") == 0 {
            tokio::task::yield_now().await;
        }
        runner.cancel_all();

        let results = run.await.unwrap();
        assert!(results.is_empty());
    }
}
