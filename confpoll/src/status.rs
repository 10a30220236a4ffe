//! Per-host poll accounting.

use std::fmt::Write;

use chrono::{DateTime, Local};
use indexmap::IndexMap;

use crate::poller::PollResult;

/// Counters and timestamps for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub host: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_attempt: Option<DateTime<Local>>,
    pub last_success: Option<DateTime<Local>>,
    /// Configuration from the most recent successful poll.
    pub last_config: Option<String>,
}

impl DeviceStatus {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            success_count: 0,
            failure_count: 0,
            last_attempt: None,
            last_success: None,
            last_config: None,
        }
    }

    pub fn attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Share of successful polls in percent; 0 before the first attempt.
    pub fn success_rate(&self) -> f64 {
        match self.attempts() {
            0 => 0.0,
            n => self.success_count as f64 * 100.0 / n as f64,
        }
    }
}

/// Aggregated status of every host seen since the tracker was created.
///
/// Entries are created on the first result for a host and kept for the
/// tracker's lifetime, including hosts later removed from the registry.
#[derive(Debug, Default)]
pub struct StatusTracker {
    devices: IndexMap<String, DeviceStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one poll result against its host.
    pub fn update(&mut self, result: &PollResult) {
        let status = self
            .devices
            .entry(result.host.clone())
            .or_insert_with(|| DeviceStatus::new(&result.host));

        status.last_attempt = Some(result.observed_at);
        match result.config() {
            Some(config) => {
                status.success_count += 1;
                status.last_success = Some(result.observed_at);
                status.last_config = Some(config.to_string());
            }
            None => status.failure_count += 1,
        }
    }

    pub fn get(&self, host: &str) -> Option<&DeviceStatus> {
        self.devices.get(host)
    }

    /// Hosts in order of first observation.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Render the status report.
    pub fn report(&self) -> String {
        let rule = "=".repeat(50);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "DEVICE STATUS REPORT");
        let _ = writeln!(out, "{rule}");

        if self.devices.is_empty() {
            let _ = writeln!(out, "No devices polled yet");
        }

        for status in self.devices.values() {
            let last_success = status
                .last_success
                .map(|at| at.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());

            let _ = writeln!(out, "{}:", status.host);
            let _ = writeln!(
                out,
                "  Succeeded: {}, Failed: {}",
                status.success_count, status.failure_count
            );
            let _ = writeln!(out, "  Success rate: {:.1}%", status.success_rate());
            let _ = writeln!(out, "  Last success: {last_success}");
        }

        let _ = write!(out, "{rule}");
        out
    }
}
