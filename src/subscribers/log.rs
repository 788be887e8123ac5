//! # Tracing-backed logging subscriber.
//!
//! [`LogWriter`] turns runtime events into `tracing` records, one line per event:
//!
//! ```text
//! INFO  runner started task_type=orders concurrency=4
//! DEBUG poll completed task_type=orders received=2 took_ms=31
//! WARN  poll failed task_type=orders reason=503 next_in_ms=400
//! INFO  task finished task_type=orders task_id=t-1 status=COMPLETED took_ms=12
//! ERROR update dropped task_type=orders task_id=t-9 attempts=4 reason="..."
//! ```
//!
//! Enabled via the `logging` feature.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Writes every runtime event as a structured `tracing` record.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task_type = e.task_type.as_deref().unwrap_or("-");
        let task_id = e.task_id.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::RunnerStarted => {
                info!(task_type, concurrency = e.count, "runner started");
            }
            EventKind::RunnerStopped => {
                info!(task_type, reason, "runner stopped");
            }
            EventKind::Paused => {
                debug!(task_type, "worker paused; poll skipped");
            }
            EventKind::PollStarted => {
                debug!(task_type, requested = e.count, "poll");
            }
            EventKind::PollCompleted => {
                debug!(task_type, received = e.count, took_ms = e.duration_ms, "poll completed");
            }
            EventKind::PollFailed => {
                warn!(task_type, reason, next_in_ms = e.delay_ms, "poll failed");
            }
            EventKind::TaskExecutionStarted => {
                debug!(task_type, task_id, "task started");
            }
            EventKind::TaskExecutionCompleted => {
                let status = e.status.map(|s| s.as_label()).unwrap_or("-");
                info!(task_type, task_id, status, took_ms = e.duration_ms, "task finished");
            }
            EventKind::TaskUpdateFailed => {
                error!(task_type, task_id, attempts = e.attempt, reason, "update dropped");
            }
            EventKind::LeaseExtended => {
                debug!(task_type, task_id, "lease extended");
            }
            EventKind::LeaseExtendFailed => {
                warn!(task_type, task_id, reason, "lease extension failed");
            }
            EventKind::AuthExhausted => {
                error!(task_type, reason, "authentication retries exhausted");
            }
            EventKind::ShutdownRequested => {
                info!("shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!("all runners stopped within grace");
            }
            EventKind::GraceExceeded => {
                warn!(stuck = reason, "grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = task_type, reason, "subscriber dropped event");
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = task_type, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
