//! # Runtime events emitted by runners and the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four groups:
//! - **Runner lifecycle**: started, stopped, paused
//! - **Polling**: poll started / completed / failed
//! - **Execution**: execution started / completed, update failed, lease extension
//! - **Runtime**: shutdown, grace outcome, auth exhaustion, subscriber health
//!
//! The [`Event`] struct carries optional metadata (task type, task id, counts,
//! durations, reasons) set according to the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use conductor_worker::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::PollCompleted)
//!     .with_task_type("orders")
//!     .with_count(3)
//!     .with_duration(Duration::from_millis(12));
//!
//! assert_eq!(ev.kind, EventKind::PollCompleted);
//! assert_eq!(ev.task_type.as_deref(), Some("orders"));
//! assert_eq!(ev.count, Some(3));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::model::TaskStatus;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `task_type` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `task_type` (subscriber name), `reason` (`"full"` / `"closed"`).
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or caller token).
    ShutdownRequested,

    /// All runners stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some runners were abandoned.
    ///
    /// Sets: `reason` (comma-separated stuck runners).
    GraceExceeded,

    // === Runner lifecycle ===
    /// Runner loop entered.
    ///
    /// Sets: `task_type`, `count` (concurrency limit).
    RunnerStarted,

    /// Runner loop left.
    ///
    /// Sets: `task_type`, `reason` (`"shutdown"` or the fatal error).
    RunnerStopped,

    /// Poll cycle skipped because the worker is paused.
    ///
    /// Sets: `task_type`.
    Paused,

    // === Polling ===
    /// Batch poll sent.
    ///
    /// Sets: `task_type`, `count` (requested).
    PollStarted,

    /// Batch poll answered.
    ///
    /// Sets: `task_type`, `count` (received), `duration_ms`.
    PollCompleted,

    /// Batch poll failed.
    ///
    /// Sets: `task_type`, `reason` (status code or `"error"`), `delay_ms` (wait before next poll).
    PollFailed,

    // === Execution ===
    /// Task handed to the worker function.
    ///
    /// Sets: `task_type`, `task_id`.
    TaskExecutionStarted,

    /// Worker function finished and the outcome was built.
    ///
    /// Sets: `task_type`, `task_id`, `status`, `duration_ms`.
    TaskExecutionCompleted,

    /// Outcome could not be reported after all retries; dropped.
    ///
    /// Sets: `task_type`, `task_id`, `attempt`, `reason`.
    TaskUpdateFailed,

    /// Lease extension sent.
    ///
    /// Sets: `task_type`, `task_id`.
    LeaseExtended,

    /// Lease extension failed (best effort, not fatal).
    ///
    /// Sets: `task_type`, `task_id`, `reason`.
    LeaseExtendFailed,

    /// 401 retries ran out on an endpoint.
    ///
    /// Sets: `task_type`, `reason`.
    AuthExhausted,
}

impl EventKind {
    /// Stable snake_case name (metric names, log fields).
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber_panicked",
            EventKind::SubscriberOverflow => "subscriber_overflow",
            EventKind::ShutdownRequested => "shutdown_requested",
            EventKind::AllStoppedWithin => "all_stopped_within_grace",
            EventKind::GraceExceeded => "grace_exceeded",
            EventKind::RunnerStarted => "runner_started",
            EventKind::RunnerStopped => "runner_stopped",
            EventKind::Paused => "task_paused",
            EventKind::PollStarted => "task_poll",
            EventKind::PollCompleted => "task_poll_completed",
            EventKind::PollFailed => "task_poll_error",
            EventKind::TaskExecutionStarted => "task_execution_started",
            EventKind::TaskExecutionCompleted => "task_execution_completed",
            EventKind::TaskUpdateFailed => "task_update_error",
            EventKind::LeaseExtended => "task_lease_extended",
            EventKind::LeaseExtendFailed => "task_lease_extend_error",
            EventKind::AuthExhausted => "auth_exhausted",
        }
    }
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Task type (or subscriber name for subscriber events).
    pub task_type: Option<Arc<str>>,
    /// Task instance id.
    pub task_id: Option<Arc<str>>,
    /// Human-readable reason (errors, status codes, overflow details).
    pub reason: Option<Arc<str>>,
    /// Tasks requested/received, or the concurrency limit.
    pub count: Option<u32>,
    /// Elapsed time in milliseconds.
    pub duration_ms: Option<u64>,
    /// Upcoming delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Outcome status of a finished execution.
    pub status: Option<TaskStatus>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task_type: None,
            task_id: None,
            reason: None,
            count: None,
            duration_ms: None,
            delay_ms: None,
            attempt: None,
            status: None,
        }
    }

    #[inline]
    pub fn with_task_type(mut self, task_type: impl Into<Arc<str>>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    #[inline]
    pub fn with_task_id(mut self, task_id: impl Into<Arc<str>>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    /// Attaches an elapsed duration (stored as milliseconds).
    #[inline]
    pub fn with_duration(mut self, d: Duration) -> Self {
        self.duration_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches an upcoming delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task_type(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task_type(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::PollStarted);
        let b = Event::new(EventKind::PollStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_fill_metadata() {
        let ev = Event::new(EventKind::TaskExecutionCompleted)
            .with_task_type("orders")
            .with_task_id("t-1")
            .with_status(TaskStatus::Failed)
            .with_duration(Duration::from_millis(1500));
        assert_eq!(ev.task_id.as_deref(), Some("t-1"));
        assert_eq!(ev.status, Some(TaskStatus::Failed));
        assert_eq!(ev.duration_ms, Some(1500));
        assert_eq!(ev.kind.as_label(), "task_execution_completed");
    }
}
