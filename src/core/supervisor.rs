//! # Supervisor: owns one runner per task type, event fan-out and graceful shutdown.
//!
//! ## Key responsibilities
//! - register task definitions for workers that ask for it
//! - subscribe to the [`Bus`] and **fan-out** events via [`SubscriberSet`]
//! - spawn one [`TaskRunner`] per worker in the configured [`ExecutionMode`]
//! - flush metrics to a file periodically (optional)
//! - on shutdown, stop polling, wait up to `grace` for in-flight work, abandon the rest
//!
//! ## High-level architecture
//! ```text
//! run() / run_until(token)
//!   ├─ register_task_defs()                         failures logged, startup continues
//!   ├─ subscriber_listener(): Bus ─► SubscriberSet::emit(&Event)
//!   ├─ metrics_flusher(): every interval ─► write(file, collector.render())
//!   ├─ for each Worker:
//!   │     ctx.spawn(task_type, TaskRunner::run(stop.child_token()))
//!   └─ drive_shutdown:
//!        ├─ all runners left on their own         → Ok(())
//!        └─ stop signal                           → publish ShutdownRequested
//!                                                   stop.cancel()  (runners stop polling and drain)
//!                                                   wait_all_with_grace(grace):
//!                                                     ├─ all joined → AllStoppedWithin, Ok(())
//!                                                     └─ timeout    → kill tokens cancelled,
//!                                                                     GraceExceeded, Err(GraceExceeded{stuck})
//! cleanup: subscriber queues drained, final metrics flush, global executor shut down
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::TaskClient;
use crate::config::ConfigResolver;
use crate::core::config::{MetricsSettings, SupervisorConfig};
use crate::core::context::{self, RunnerHandle};
use crate::core::runner::{RunnerParams, TaskRunner};
use crate::core::shutdown;
use crate::error::{RunnerError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::executor::BackgroundExecutor;
use crate::subscribers::{MetricsCollector, Subscribe, SubscriberSet};
use crate::worker::Worker;

/// Runs a set of workers until shutdown.
///
/// Built with [`SupervisorBuilder`](crate::SupervisorBuilder).
pub struct Supervisor {
    pub(crate) cfg: SupervisorConfig,
    pub(crate) bus: Bus,
    pub(crate) client: Arc<dyn TaskClient>,
    pub(crate) workers: Vec<Worker>,
    pub(crate) subscribers: Vec<Arc<dyn Subscribe>>,
    pub(crate) resolver: ConfigResolver,
    /// `None` → the process-wide executor, shut down when the run ends.
    pub(crate) executor: Option<BackgroundExecutor>,
    pub(crate) metrics: Option<MetricsCollector>,
}

impl Supervisor {
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Event bus; subscribe before calling `run` to observe every event.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Metrics collector, present when `SupervisorConfig::metrics` is set.
    pub fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_ref()
    }

    /// Task types this supervisor will run.
    pub fn task_types(&self) -> Vec<&str> {
        self.workers.iter().map(Worker::task_type).collect()
    }

    /// Runs until SIGINT/SIGTERM/SIGQUIT (Ctrl-C on Windows), then shuts down gracefully.
    pub async fn run(self) -> Result<(), RuntimeError> {
        self.run_with(async {
            match shutdown::wait_for_shutdown_signal().await {
                Ok(signal) => info!(signal, "termination signal received"),
                Err(e) => {
                    error!(error = %e, "cannot install shutdown signal handlers; running until killed");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Runs until `token` is cancelled, then shuts down gracefully.
    pub async fn run_until(self, token: CancellationToken) -> Result<(), RuntimeError> {
        self.run_with(token.cancelled_owned()).await
    }

    async fn run_with(self, stop_signal: impl Future<Output = ()>) -> Result<(), RuntimeError> {
        if self.workers.is_empty() {
            return Err(RuntimeError::NoWorkers);
        }
        info!(
            workers = self.workers.len(),
            mode = self.cfg.mode.as_label(),
            "starting workers"
        );

        self.register_task_defs().await;
        let listener_stop = CancellationToken::new();
        let listener = self.subscriber_listener(listener_stop.clone());
        let flusher = self.metrics_flusher(listener_stop.clone());

        let runners_stop = CancellationToken::new();
        let res = match self.spawn_runners(&runners_stop) {
            Ok(handles) => self.drive_shutdown(handles, &runners_stop, stop_signal).await,
            Err(e) => {
                runners_stop.cancel();
                Err(e)
            }
        };

        listener_stop.cancel();
        if let Err(e) = listener.await {
            warn!(error = %e, "subscriber listener failed");
        }
        if let Some(flusher) = flusher {
            let _ = flusher.await;
        }
        self.flush_metrics().await;
        self.shutdown_executor().await;
        res
    }

    /// Registers definitions for workers whose resolved settings ask for it.
    async fn register_task_defs(&self) {
        let defs: Vec<_> = self
            .workers
            .iter()
            .filter(|w| {
                self.resolver
                    .resolve(w.task_type(), w.defaults())
                    .register_task_def
            })
            .map(Worker::task_def)
            .collect();
        if defs.is_empty() {
            return;
        }

        match self.client.register_task_defs(&defs).await {
            Ok(()) => info!(count = defs.len(), "task definitions registered"),
            Err(e) => warn!(error = %e, "task definition registration failed; continuing"),
        }
    }

    /// Forwards bus events to the subscriber set until `stop`, then drains the queues.
    fn subscriber_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = SubscriberSet::new(self.subscribers.clone(), self.bus.clone());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "subscriber listener lagged"),
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => break,
                }
            }
            while let Ok(ev) = rx.try_recv() {
                set.emit(&ev);
            }
            set.shutdown().await;
        })
    }

    fn metrics_flusher(&self, stop: CancellationToken) -> Option<JoinHandle<()>> {
        let (collector, settings) = (self.metrics.clone()?, self.cfg.metrics.clone()?);
        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(settings.interval.max(Duration::from_millis(10)));
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => write_metrics(&collector, &settings).await,
                    _ = stop.cancelled() => break,
                }
            }
        }))
    }

    async fn flush_metrics(&self) {
        if let (Some(collector), Some(settings)) = (&self.metrics, &self.cfg.metrics) {
            write_metrics(collector, settings).await;
        }
    }

    fn spawn_runners(&self, stop: &CancellationToken) -> Result<Vec<RunnerHandle>, RuntimeError> {
        let ctx = context::for_mode(self.cfg.mode);
        let executor = self.executor.clone().unwrap_or_else(BackgroundExecutor::global);

        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let runner = TaskRunner::new(
                worker.clone(),
                RunnerParams {
                    client: Arc::clone(&self.client),
                    resolver: self.resolver.clone(),
                    executor: executor.clone(),
                    bus: self.bus.clone(),
                    update_retry: self.cfg.update_retry,
                    poll_backoff: self.cfg.poll_backoff,
                },
            );
            let fut = runner.run(stop.child_token()).boxed();
            match ctx.spawn(worker.task_type(), fut) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for h in &handles {
                        h.kill_token().cancel();
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Waits until either all runners leave or the stop signal fires.
    async fn drive_shutdown(
        &self,
        handles: Vec<RunnerHandle>,
        runners_stop: &CancellationToken,
        stop_signal: impl Future<Output = ()>,
    ) -> Result<(), RuntimeError> {
        let alive = Arc::new(Mutex::new(BTreeSet::new()));
        let mut kills = Vec::with_capacity(handles.len());
        let mut pending = FuturesUnordered::new();

        for handle in handles {
            lock(&alive).insert(handle.name().to_string());
            kills.push(handle.kill_token());
            let alive = Arc::clone(&alive);
            pending.push(async move {
                let (name, res) = handle.join().await;
                lock(&alive).remove(&name);
                log_exit(&name, &res);
            });
        }

        tokio::select! {
            _ = stop_signal => {
                info!("shutdown requested");
                self.bus.publish(Event::new(EventKind::ShutdownRequested));
                runners_stop.cancel();
                self.wait_all_with_grace(&mut pending, &alive, &kills).await
            }
            _ = async { while pending.next().await.is_some() {} } => {
                info!("all runners stopped");
                Ok(())
            }
        }
    }

    /// Waits for all runners within the grace period; abandons the rest on timeout.
    async fn wait_all_with_grace<F: Future<Output = ()>>(
        &self,
        pending: &mut FuturesUnordered<F>,
        alive: &Mutex<BTreeSet<String>>,
        kills: &[CancellationToken],
    ) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let done = async { while pending.next().await.is_some() {} };

        match tokio::time::timeout(grace, done).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<String> = lock(alive).iter().cloned().collect();
                warn!(?grace, ?stuck, "grace exceeded; abandoning in-flight work");
                for kill in kills {
                    kill.cancel();
                }
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    async fn shutdown_executor(&self) {
        if self.executor.is_some() {
            return;
        }
        if let Err(e) = tokio::task::spawn_blocking(BackgroundExecutor::shutdown_global).await {
            warn!(error = %e, "background executor shutdown failed");
        }
    }
}

async fn write_metrics(collector: &MetricsCollector, settings: &MetricsSettings) {
    match tokio::fs::write(&settings.file, collector.render()).await {
        Ok(()) => debug!(file = %settings.file.display(), "metrics flushed"),
        Err(e) => warn!(file = %settings.file.display(), error = %e, "metrics flush failed"),
    }
}

fn log_exit(name: &str, res: &Result<(), RunnerError>) {
    match res {
        Ok(()) => debug!(task_type = name, "runner joined"),
        Err(RunnerError::Abandoned) => warn!(task_type = name, "runner abandoned"),
        Err(e) => error!(task_type = name, error = %e, label = e.as_label(), "runner failed"),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapProvider;
    use crate::core::runner::tests::{task, FakeClient};
    use crate::core::ExecutionMode;
    use crate::error::{TaskError, TransportError};
    use crate::model::{TaskEnvelope, TaskStatus};
    use crate::policies::AuthStopBehavior;
    use crate::SupervisorBuilder;

    fn echo() -> Worker {
        Worker::new("orders", |_t: &TaskEnvelope| Ok::<_, TaskError>(()))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn builder(client: Arc<FakeClient>, cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
            .with_client(client)
            .with_config_provider(Arc::new(MapProvider::new()))
            .with_executor(BackgroundExecutor::new())
    }

    #[tokio::test]
    async fn no_workers_is_an_error() {
        let sup = builder(Arc::default(), SupervisorConfig::default())
            .build()
            .unwrap();
        assert!(matches!(
            sup.run_until(CancellationToken::new()).await,
            Err(RuntimeError::NoWorkers)
        ));
    }

    #[tokio::test]
    async fn runs_until_token_then_stops_within_grace() {
        for mode in [ExecutionMode::Tasks, ExecutionMode::Threads] {
            let client = Arc::new(FakeClient::default());
            client.script(Ok(vec![task("t-1")]));
            let sup = builder(client.clone(), SupervisorConfig::default().with_mode(mode))
                .add_worker(echo())
                .build()
                .unwrap();
            let mut rx = sup.bus().subscribe();

            let token = CancellationToken::new();
            let stop = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                stop.cancel();
            });
            sup.run_until(token).await.unwrap();

            assert_eq!(client.reported().len(), 1, "mode {mode:?}");
            assert_eq!(client.reported()[0].status, TaskStatus::Completed);
            let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect();
            assert!(kinds.contains(&EventKind::ShutdownRequested));
            assert!(kinds.contains(&EventKind::AllStoppedWithin));
        }
    }

    #[tokio::test]
    async fn grace_exceeded_names_stuck_runners() {
        let client = Arc::new(FakeClient::default());
        client.script(Ok(vec![task("t-1")]));
        let slow = Worker::new_async("orders", |_t: TaskEnvelope| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, TaskError>(())
        })
        .with_poll_interval(Duration::from_millis(5));

        let cfg = SupervisorConfig::default().with_grace(Duration::from_millis(50));
        let sup = builder(client.clone(), cfg).add_worker(slow).build().unwrap();

        let token = CancellationToken::new();
        let stop = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });

        match sup.run_until(token).await {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, vec!["orders".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(client.reported().is_empty());
    }

    #[test]
    fn stuck_sync_function_does_not_hold_the_runtime_open() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let client = Arc::new(FakeClient::default());
        client.script(Ok(vec![task("t-1")]));
        let stuck = Worker::new("orders", |_t: &TaskEnvelope| {
            std::thread::sleep(Duration::from_secs(3));
            Ok::<_, TaskError>(())
        })
        .with_poll_interval(Duration::from_millis(5));
        let cfg = SupervisorConfig::default().with_grace(Duration::from_millis(50));

        let res = rt.block_on(async move {
            let sup = builder(client, cfg).add_worker(stuck).build().unwrap();
            let token = CancellationToken::new();
            let stop = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                stop.cancel();
            });
            sup.run_until(token).await
        });
        assert!(matches!(res, Err(RuntimeError::GraceExceeded { .. })));

        let dropping = std::time::Instant::now();
        drop(rt);
        assert!(dropping.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn fatal_runner_exit_ends_the_run() {
        let client = Arc::new(FakeClient::default());
        client.script(Err(TransportError::AuthExhausted {
            path: "tasks/poll/batch/orders".into(),
            attempts: 1,
            stop: AuthStopBehavior::StopWorker,
        }));
        let sup = builder(client, SupervisorConfig::default())
            .add_worker(echo())
            .build()
            .unwrap();

        let res = tokio::time::timeout(Duration::from_secs(5), sup.run_until(CancellationToken::new())).await;
        assert!(matches!(res, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn metrics_are_flushed_to_file() {
        let dir = std::env::temp_dir().join(format!("conductor-worker-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("metrics.prom");

        let client = Arc::new(FakeClient::default());
        client.script(Ok(vec![task("t-1")]));
        let cfg = SupervisorConfig::default()
            .with_metrics(MetricsSettings::new(&file).with_interval(Duration::from_millis(20)));
        let sup = builder(client, cfg).add_worker(echo()).build().unwrap();
        let metrics = sup.metrics().cloned().unwrap();

        let token = CancellationToken::new();
        let stop = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.cancel();
        });
        sup.run_until(token).await.unwrap();

        let rendered = metrics.render();
        assert_eq!(
            crate::subscribers::sample(
                &rendered,
                "conductor_worker_task_execution_completed_total",
                &[("taskType", "orders"), ("status", "completed")],
            ),
            Some(1.0)
        );
        let text = std::fs::read_to_string(&file).unwrap();
        assert!(text.contains("conductor_worker_task_poll_total{taskType=\"orders\"}"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn registers_task_defs_when_asked() {
        #[derive(Default)]
        struct Registering {
            inner: FakeClient,
            defs: Mutex<Vec<String>>,
        }

        #[async_trait::async_trait]
        impl TaskClient for Registering {
            async fn batch_poll(
                &self,
                req: &crate::client::PollRequest,
            ) -> Result<Vec<TaskEnvelope>, TransportError> {
                self.inner.batch_poll(req).await
            }
            async fn update_task(&self, o: &crate::model::TaskOutcome) -> Result<(), TransportError> {
                self.inner.update_task(o).await
            }
            async fn register_task_defs(&self, defs: &[crate::model::TaskDef]) -> Result<(), TransportError> {
                lock(&self.defs).extend(defs.iter().map(|d| d.name.clone()));
                Ok(())
            }
        }

        let client = Arc::new(Registering::default());
        let provider = Arc::new(MapProvider::new());
        provider.set("conductor.worker.billing.register_task_def", "true");

        let billing = Worker::new("billing", |_t: &TaskEnvelope| Ok::<_, TaskError>(()));
        let sup = SupervisorBuilder::new(SupervisorConfig::default())
            .with_client(client.clone())
            .with_config_provider(provider)
            .with_executor(BackgroundExecutor::new())
            .with_workers(vec![echo(), billing])
            .build()
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        sup.run_until(token).await.unwrap();
        assert_eq!(*lock(&client.defs), vec!["billing".to_string()]);
    }
}
