//! Bookkeeping for executions a runner has dispatched but not yet reported.

use std::time::Duration;

use tokio::time::Instant;

use crate::executor::ExecutionHandle;
use crate::model::TaskEnvelope;
use crate::worker::WorkerResult;

/// Share of the response timeout after which the lease is extended.
const LEASE_EXTEND_RATIO: f64 = 0.8;

/// One dispatched task and the slot its result will land in.
#[derive(Debug)]
pub(crate) struct InFlightExecution {
    pub(crate) task: TaskEnvelope,
    pub(crate) started_at: Instant,
    pub(crate) handle: ExecutionHandle<WorkerResult>,
    next_extend_at: Option<Instant>,
}

impl InFlightExecution {
    pub(crate) fn new(task: TaskEnvelope, started_at: Instant, handle: ExecutionHandle<WorkerResult>) -> Self {
        let next_extend_at = lease_window(&task).map(|w| started_at + w);
        Self {
            task,
            started_at,
            handle,
            next_extend_at,
        }
    }

    /// When the next lease extension is due (`None` if the task has no response timeout).
    pub(crate) fn next_extend_at(&self) -> Option<Instant> {
        self.next_extend_at
    }

    pub(crate) fn extend_due(&self, now: Instant) -> bool {
        self.next_extend_at.is_some_and(|at| now >= at)
    }

    /// Schedules the next extension one full window after a successful one.
    pub(crate) fn extended(&mut self, now: Instant) {
        self.next_extend_at = lease_window(&self.task).map(|w| now + w);
    }

    /// Failed extensions are retried after a quarter window.
    pub(crate) fn extend_failed(&mut self, now: Instant) {
        self.next_extend_at = lease_window(&self.task).map(|w| now + w / 4);
    }
}

fn lease_window(task: &TaskEnvelope) -> Option<Duration> {
    task.response_timeout()
        .map(|t| t.mul_f64(LEASE_EXTEND_RATIO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::executor::BackgroundExecutor;
    use crate::worker::UserReturn;

    fn ready(exec: &BackgroundExecutor) -> ExecutionHandle<WorkerResult> {
        exec.submit(async { Ok::<_, TaskError>(UserReturn::from(())) })
            .unwrap()
    }

    #[tokio::test]
    async fn lease_window_follows_response_timeout() {
        let exec = BackgroundExecutor::new();
        let start = Instant::now();
        let task = TaskEnvelope::new("t-1", "wf-1", "orders")
            .with_response_timeout(Duration::from_secs(10));
        let mut inflight = InFlightExecution::new(task, start, ready(&exec));

        assert_eq!(inflight.next_extend_at(), Some(start + Duration::from_secs(8)));
        assert!(!inflight.extend_due(start + Duration::from_secs(7)));
        assert!(inflight.extend_due(start + Duration::from_secs(8)));

        let later = start + Duration::from_secs(8);
        inflight.extend_failed(later);
        assert_eq!(inflight.next_extend_at(), Some(later + Duration::from_secs(2)));
        inflight.extended(later);
        assert_eq!(inflight.next_extend_at(), Some(later + Duration::from_secs(8)));

        let untimed = InFlightExecution::new(TaskEnvelope::new("t-2", "wf-1", "orders"), start, ready(&exec));
        assert_eq!(untimed.next_extend_at(), None);
        exec.shutdown();
    }
}
