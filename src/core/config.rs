//! # Supervisor configuration.
//!
//! [`SupervisorConfig`] holds the process-level settings of the runtime. Per-task
//! settings (poll interval, concurrency, pause, ...) live in
//! [`WorkerSettings`](crate::config::WorkerSettings) and are resolved per runner.
//!
//! ## Sentinel values
//! - `grace = 0s` → runners still in flight at shutdown are abandoned immediately
//! - `metrics = None` → no metrics collector, no flush task

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy, UpdateRetryPolicy};

/// Where each runner executes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Runners are tokio tasks on the caller's runtime.
    #[default]
    Tasks,
    /// Every runner gets its own OS thread and current-thread runtime.
    Threads,
}

impl ExecutionMode {
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecutionMode::Tasks => "tasks",
            ExecutionMode::Threads => "threads",
        }
    }
}

/// Periodic metrics file output.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsSettings {
    /// File the Prometheus text is written to (overwritten on every flush).
    pub file: PathBuf,
    /// Flush period.
    pub interval: Duration,
}

impl MetricsSettings {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            interval: Duration::from_secs(10),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Global configuration for the supervisor runtime.
///
/// ## Field semantics
/// - `grace`: how long in-flight executions may finish and report after shutdown starts
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `mode`: see [`ExecutionMode`]
/// - `metrics`: optional metrics collector + periodic file flush
/// - `update_retry`: bounded retries for reporting outcomes
/// - `poll_backoff`: growth of the wait after consecutive poll failures
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub grace: Duration,
    pub bus_capacity: usize,
    pub mode: ExecutionMode,
    pub metrics: Option<MetricsSettings>,
    pub update_retry: UpdateRetryPolicy,
    pub poll_backoff: BackoffPolicy,
}

impl SupervisorConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsSettings) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_update_retry(mut self, policy: UpdateRetryPolicy) -> Self {
        self.update_retry = policy;
        self
    }

    pub fn with_poll_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.poll_backoff = backoff;
        self
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - `mode = Tasks`
    /// - `metrics = None`
    /// - `update_retry = UpdateRetryPolicy::default()` (4 attempts)
    /// - `poll_backoff`: 1s doubling to 60s, full jitter
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            mode: ExecutionMode::Tasks,
            metrics: None,
            update_retry: UpdateRetryPolicy::default(),
            poll_backoff: BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(60))
                .with_jitter(JitterPolicy::Full),
        }
    }
}
