//! # TaskRunner: the poll → execute → report loop of one task type.
//!
//! One runner per registered [`Worker`]. Runners of different task types share
//! nothing mutable; each owns its in-flight table.
//!
//! ```text
//! loop (until stop):
//!   settings = resolver.resolve(task_type)        env changes apply within one cycle
//!   reap()            finished handles ──► normalize ──► report (bounded retries)
//!   extend_leases()   ~80% of responseTimeout elapsed ──► extend-lease update
//!   poll (when due):
//!     paused?              ──► Paused event, wait poll_interval (no request sent)
//!     capacity = thread_count − in_flight
//!     capacity == 0        ──► wait poll_interval
//!     batch_poll(capacity) ──► dispatch each task
//!        ├─ sync fn  → SyncPool       ┐
//!        └─ async fn → BackgroundExecutor::submit_with_notify
//!                                     └─► done.notify() wakes the loop
//!     poll error           ──► wait max(poll_interval, poll_backoff.next(failures−1))
//!     401 exhausted + StopWorker ──► leave with RunnerError::Fatal
//!   wait: stop | done | next poll / lease deadline
//! drain: keep reaping until in-flight is empty (bounded by the supervisor's grace)
//! ```
//!
//! ## Rules
//! - At most `thread_count` executions are in flight; extra polled tasks are
//!   dropped and left for the server to re-offer.
//! - Task, transport and serialization failures never end the loop.
//! - An outcome that still fails after `update_retry.attempts` is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{PollRequest, TaskClient};
use crate::config::{ConfigResolver, WorkerDefaults, WorkerSettings};
use crate::core::inflight::InFlightExecution;
use crate::core::pool::SyncPool;
use crate::error::{ExecutorError, RunnerError, TaskError, TransportError};
use crate::events::{Bus, Event, EventKind};
use crate::executor::BackgroundExecutor;
use crate::model::{TaskEnvelope, TaskOutcome};
use crate::policies::{BackoffPolicy, UpdateRetryPolicy};
use crate::worker::{normalize, Invocation, Worker, WorkerResult};

/// Collaborators a runner needs besides its worker.
pub(crate) struct RunnerParams {
    pub(crate) client: Arc<dyn TaskClient>,
    pub(crate) resolver: ConfigResolver,
    pub(crate) executor: BackgroundExecutor,
    pub(crate) bus: Bus,
    pub(crate) update_retry: UpdateRetryPolicy,
    pub(crate) poll_backoff: BackoffPolicy,
}

/// Poll-execute-report loop for one task type.
pub(crate) struct TaskRunner {
    task_type: Arc<str>,
    worker: Worker,
    defaults: WorkerDefaults,
    client: Arc<dyn TaskClient>,
    resolver: ConfigResolver,
    executor: BackgroundExecutor,
    bus: Bus,
    update_retry: UpdateRetryPolicy,
    poll_backoff: BackoffPolicy,
    in_flight: Vec<InFlightExecution>,
    sync_pool: SyncPool,
    done: Arc<Notify>,
    poll_failures: u32,
}

impl TaskRunner {
    pub(crate) fn new(worker: Worker, params: RunnerParams) -> Self {
        let task_type: Arc<str> = Arc::from(worker.task_type());

        // Pin the fallback worker id so it stays stable across re-resolutions.
        let mut defaults = worker.defaults().clone();
        if defaults.worker_id.is_none() {
            defaults.worker_id = Some(params.resolver.resolve(&task_type, &defaults).worker_id);
        }

        let sync_pool = SyncPool::new(&task_type);
        Self {
            task_type,
            worker,
            defaults,
            client: params.client,
            resolver: params.resolver,
            executor: params.executor,
            bus: params.bus,
            update_retry: params.update_retry,
            poll_backoff: params.poll_backoff,
            in_flight: Vec::new(),
            sync_pool,
            done: Arc::new(Notify::new()),
            poll_failures: 0,
        }
    }

    /// Current effective settings (re-read from the provider on every call).
    pub(crate) fn settings(&self) -> WorkerSettings {
        self.resolver.resolve(&self.task_type, &self.defaults)
    }

    /// Runs until `stop` is cancelled, then drains in-flight executions.
    pub(crate) async fn run(mut self, stop: CancellationToken) -> Result<(), RunnerError> {
        let settings = self.settings();
        info!(
            task_type = %self.task_type,
            worker_id = %settings.worker_id,
            concurrency = settings.thread_count,
            async_fn = self.worker.is_async(),
            "runner started"
        );
        self.bus.publish(
            Event::new(EventKind::RunnerStarted)
                .with_task_type(Arc::clone(&self.task_type))
                .with_count(settings.thread_count),
        );

        let res = match self.run_loop(&stop).await {
            Ok(()) => self.drain().await,
            Err(e) => Err(e),
        };

        let reason = match &res {
            Ok(()) => "shutdown".to_string(),
            Err(e) => e.to_string(),
        };
        info!(task_type = %self.task_type, %reason, "runner stopped");
        self.bus.publish(
            Event::new(EventKind::RunnerStopped)
                .with_task_type(Arc::clone(&self.task_type))
                .with_reason(reason),
        );
        res
    }

    async fn run_loop(&mut self, stop: &CancellationToken) -> Result<(), RunnerError> {
        let mut next_poll = Instant::now();

        loop {
            if stop.is_cancelled() {
                return Ok(());
            }
            let settings = self.settings();
            self.reap(&settings).await?;
            self.extend_leases(&settings).await;

            if Instant::now() >= next_poll {
                let wait = self.poll_once(&settings).await?;
                next_poll = Instant::now() + wait;
            }

            let wake_at = self.wake_at(next_poll, &settings);
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = self.done.notified() => {}
                _ = time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Reports whatever is still running; the supervisor's grace period bounds this.
    async fn drain(&mut self) -> Result<(), RunnerError> {
        if !self.in_flight.is_empty() {
            info!(task_type = %self.task_type, in_flight = self.in_flight.len(), "draining");
        }
        while !self.in_flight.is_empty() {
            let settings = self.settings();
            self.reap(&settings).await?;
            self.extend_leases(&settings).await;
            if self.in_flight.is_empty() {
                break;
            }
            let wake_at = self.wake_at(Instant::now() + settings.poll_interval, &settings);
            tokio::select! {
                _ = self.done.notified() => {}
                _ = time::sleep_until(wake_at) => {}
            }
        }
        Ok(())
    }

    /// One poll step; returns how long to wait before the next one.
    async fn poll_once(&mut self, settings: &WorkerSettings) -> Result<Duration, RunnerError> {
        let task_type = Arc::clone(&self.task_type);

        if settings.paused {
            debug!(%task_type, "paused; poll skipped");
            self.bus
                .publish(Event::new(EventKind::Paused).with_task_type(task_type));
            return Ok(settings.poll_interval);
        }

        let capacity = settings.thread_count.saturating_sub(self.in_flight.len());
        if capacity == 0 {
            return Ok(settings.poll_interval);
        }

        let req = PollRequest {
            task_type: task_type.to_string(),
            worker_id: settings.worker_id.clone(),
            domain: settings.domain.clone(),
            count: capacity,
            timeout: settings.poll_timeout,
        };
        self.bus.publish(
            Event::new(EventKind::PollStarted)
                .with_task_type(Arc::clone(&task_type))
                .with_count(capacity),
        );

        let started = Instant::now();
        match self.client.batch_poll(&req).await {
            Ok(mut tasks) => {
                self.poll_failures = 0;
                self.bus.publish(
                    Event::new(EventKind::PollCompleted)
                        .with_task_type(Arc::clone(&task_type))
                        .with_count(tasks.len())
                        .with_duration(started.elapsed()),
                );
                if tasks.len() > capacity {
                    warn!(
                        %task_type,
                        received = tasks.len(),
                        capacity,
                        "server returned more tasks than requested; extras left for re-delivery"
                    );
                    tasks.truncate(capacity);
                }

                let received = tasks.len();
                for task in tasks {
                    self.dispatch(task, settings).await?;
                }
                Ok(if received == 0 {
                    settings.poll_interval
                } else {
                    Duration::ZERO
                })
            }
            Err(e) => {
                self.note_auth_exhausted(&e);
                if e.is_fatal() {
                    error!(%task_type, error = %e, "stopping runner");
                    return Err(RunnerError::Fatal(e));
                }

                self.poll_failures = self.poll_failures.saturating_add(1);
                let delay = settings
                    .poll_interval
                    .max(self.poll_backoff.next(self.poll_failures - 1));
                warn!(%task_type, error = %e, failures = self.poll_failures, ?delay, "poll failed");
                self.bus.publish(
                    Event::new(EventKind::PollFailed)
                        .with_task_type(task_type)
                        .with_reason(e.as_label())
                        .with_attempt(self.poll_failures)
                        .with_delay(delay),
                );
                Ok(delay)
            }
        }
    }

    /// Hands one task to the worker function.
    ///
    /// Sync functions run on the runner's own thread pool, async ones on the background
    /// executor; both land in the in-flight table and wake the loop when done.
    async fn dispatch(
        &mut self,
        task: TaskEnvelope,
        settings: &WorkerSettings,
    ) -> Result<(), RunnerError> {
        debug!(task_type = %self.task_type, task_id = %task.task_id, "dispatching");
        self.bus.publish(
            Event::new(EventKind::TaskExecutionStarted)
                .with_task_type(Arc::clone(&self.task_type))
                .with_task_id(task.task_id.as_str()),
        );
        let started = Instant::now();

        if self.worker.is_async() {
            match self.worker.start(&task) {
                Invocation::Ready(result) => {
                    return self.finish(task, Ok(result), started, settings).await;
                }
                Invocation::Deferred(fut) => {
                    match self.executor.submit_with_notify(fut, Arc::clone(&self.done)) {
                        Ok(handle) => {
                            self.in_flight
                                .push(InFlightExecution::new(task, started, handle));
                        }
                        Err(e) => return self.finish(task, Err(e), started, settings).await,
                    }
                }
            }
            return Ok(());
        }

        let worker = self.worker.clone();
        let executor = self.executor.clone();
        let input = task.clone();
        let job = move || match worker.start(&input) {
            Invocation::Ready(result) => result,
            Invocation::Deferred(fut) => executor
                .submit_and_await(fut)
                .map_err(TaskError::from)
                .and_then(|r| r),
        };

        match self
            .sync_pool
            .submit(settings.thread_count, job, Arc::clone(&self.done))
        {
            Ok(handle) => {
                self.in_flight
                    .push(InFlightExecution::new(task, started, handle));
                Ok(())
            }
            Err(e) => self.finish(task, Err(e), started, settings).await,
        }
    }

    /// Moves finished executions out of the table and reports them.
    async fn reap(&mut self, settings: &WorkerSettings) -> Result<(), RunnerError> {
        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.in_flight.len() {
            match self.in_flight[i].handle.try_take() {
                Some(res) => finished.push((self.in_flight.swap_remove(i), res)),
                None => i += 1,
            }
        }

        for (exec, res) in finished {
            self.finish(exec.task, res, exec.started_at, settings).await?;
        }
        Ok(())
    }

    async fn finish(
        &self,
        task: TaskEnvelope,
        res: Result<WorkerResult, ExecutorError>,
        started: Instant,
        settings: &WorkerSettings,
    ) -> Result<(), RunnerError> {
        let result = res.map_err(TaskError::from).and_then(|r| r);
        let outcome = normalize(&task, result, &settings.worker_id);
        let took = started.elapsed();

        debug!(
            task_type = %self.task_type,
            task_id = %task.task_id,
            status = outcome.status.as_label(),
            ?took,
            "execution finished"
        );
        self.bus.publish(
            Event::new(EventKind::TaskExecutionCompleted)
                .with_task_type(Arc::clone(&self.task_type))
                .with_task_id(task.task_id.as_str())
                .with_status(outcome.status)
                .with_duration(took),
        );
        self.report(&outcome).await
    }

    /// Sends one outcome with bounded retries; gives up (and drops it) after the last attempt.
    async fn report(&self, outcome: &TaskOutcome) -> Result<(), RunnerError> {
        let attempts = self.update_retry.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.client.update_task(outcome).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.note_auth_exhausted(&e);
                    if e.is_fatal() {
                        error!(task_type = %self.task_type, task_id = %outcome.task_id, error = %e, "stopping runner");
                        return Err(RunnerError::Fatal(e));
                    }
                    warn!(
                        task_type = %self.task_type,
                        task_id = %outcome.task_id,
                        attempt = attempt + 1,
                        error = %e,
                        "update failed"
                    );
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        time::sleep(self.update_retry.backoff.next(attempt)).await;
                    }
                }
            }
        }

        error!(
            task_type = %self.task_type,
            task_id = %outcome.task_id,
            attempts,
            "dropping outcome; the server will re-queue the task after its timeout"
        );
        self.bus.publish(
            Event::new(EventKind::TaskUpdateFailed)
                .with_task_type(Arc::clone(&self.task_type))
                .with_task_id(outcome.task_id.as_str())
                .with_attempt(attempts)
                .with_reason(last_error),
        );
        Ok(())
    }

    /// Best-effort lease extension for long-running executions.
    async fn extend_leases(&mut self, settings: &WorkerSettings) {
        if !settings.lease_extend_enabled {
            return;
        }
        let now = Instant::now();
        for exec in self.in_flight.iter_mut().filter(|e| e.extend_due(now)) {
            let update = TaskOutcome::extend_lease(&exec.task, &settings.worker_id);
            let task_id = exec.task.task_id.as_str();
            match self.client.update_task(&update).await {
                Ok(()) => {
                    debug!(task_type = %self.task_type, task_id, "lease extended");
                    self.bus.publish(
                        Event::new(EventKind::LeaseExtended)
                            .with_task_type(Arc::clone(&self.task_type))
                            .with_task_id(task_id),
                    );
                    exec.extended(Instant::now());
                }
                Err(e) => {
                    warn!(task_type = %self.task_type, task_id, error = %e, "lease extension failed");
                    self.bus.publish(
                        Event::new(EventKind::LeaseExtendFailed)
                            .with_task_type(Arc::clone(&self.task_type))
                            .with_task_id(task_id)
                            .with_reason(e.to_string()),
                    );
                    exec.extend_failed(Instant::now());
                }
            }
        }
    }

    /// Earliest of the next poll and the next lease extension.
    fn wake_at(&self, next_poll: Instant, settings: &WorkerSettings) -> Instant {
        if !settings.lease_extend_enabled {
            return next_poll;
        }
        self.in_flight
            .iter()
            .filter_map(InFlightExecution::next_extend_at)
            .fold(next_poll, Instant::min)
    }

    fn note_auth_exhausted(&self, e: &TransportError) {
        if let TransportError::AuthExhausted { .. } = e {
            self.bus.publish(
                Event::new(EventKind::AuthExhausted)
                    .with_task_type(Arc::clone(&self.task_type))
                    .with_reason(e.to_string()),
            );
        }
    }
}

impl Drop for TaskRunner {
    /// Abandoned async executions are cancelled on the background executor.
    fn drop(&mut self) {
        for exec in &self.in_flight {
            exec.handle.cancel();
        }
    }
}
