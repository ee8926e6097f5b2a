//! Tuning for the watch loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_QUIET_PERIOD_MS: u64 = 100;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 500;
const DEFAULT_THREAD_NAME: &str = "trb-output-watcher";

/// Configuration for a [`DirectoryWatcher`](crate::DirectoryWatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// How long to wait after the first event of a burst before draining.
    pub quiet_period_ms: u64,

    /// Upper bound on a single blocking wait for OS events.
    pub poll_timeout_ms: u64,

    /// Name given to the background loop thread.
    pub thread_name: String,
}

impl WatcherConfig {
    /// Create a config with default timings.
    pub fn new() -> Self {
        Self {
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Set the quiet period.
    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period_ms = duration_millis(quiet_period);
        self
    }

    /// Set the poll timeout.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout_ms = duration_millis(poll_timeout);
        self
    }

    /// Set the loop thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Quiet period that ends a burst.
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Poll timeout, never zero so the loop cannot busy-spin.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
