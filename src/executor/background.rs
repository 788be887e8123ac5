//! # BackgroundExecutor: one shared scheduler thread for async task functions.
//!
//! A single current-thread tokio runtime lives on its own OS thread, started on
//! first use. Any number of caller threads submit futures to it.
//!
//! ```text
//! caller thread(s)                     "conductor-bg-executor" thread
//! ─────────────────                    ──────────────────────────────
//! submit_and_await(fut) ──spawn_on──►  guarded(fut): timeout ⊕ cancel ⊕ catch_unwind
//!   └─ recv_timeout(call_timeout) ◄──── result via sync channel
//!
//! submit(fut) ──────────spawn_on──►    guarded(fut)
//!   └─ ExecutionHandle (try_take/wait) ◄── result via oneshot (+ optional Notify)
//!
//! shutdown():
//!   token.cancel() → pending work resolves to Cancelled
//!   stop signal    → tracker.wait() bounded by shutdown_grace → runtime dropped → thread joined
//! ```
//!
//! ## Rules
//! - Startup is exactly-once under a mutex; waits at most `startup_timeout`.
//! - Every submission is bounded by `call_timeout` (default 300s); on expiry the
//!   future is dropped (cancelled) and the caller sees [`ExecutorError::Timeout`].
//! - Blocking submission from the executor thread itself fails with
//!   [`ExecutorError::Reentrant`] instead of deadlocking.
//! - After shutdown, `submit_and_await` runs the future on a throwaway runtime,
//!   unless the caller is already inside a runtime ([`ExecutorError::ShutDown`]).
//! - `shutdown` is idempotent and also runs when the last clone is dropped.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::{Builder, Handle};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;
use crate::executor::handle::ExecutionHandle;
use crate::executor::panic_message;

const THREAD_NAME: &str = "conductor-bg-executor";

static GLOBAL: OnceLock<BackgroundExecutor> = OnceLock::new();

/// Timing limits of a [`BackgroundExecutor`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExecutorConfig {
    /// How long to wait for the scheduler thread to come up.
    pub startup_timeout: Duration,
    /// Hard ceiling for one submitted future.
    pub call_timeout: Duration,
    /// How long shutdown lets cancelled work unwind.
    pub shutdown_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Cloneable handle to a shared background scheduler.
#[derive(Clone)]
pub struct BackgroundExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: ExecutorConfig,
    state: Mutex<State>,
}

enum State {
    Idle,
    Running(Running),
    ShutDown,
}

struct Running {
    shared: Shared,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

/// What submitters need from a running executor.
#[derive(Clone)]
struct Shared {
    handle: Handle,
    thread_id: ThreadId,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundExecutor {
    /// Creates an executor with default limits. The thread starts on first use.
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(cfg: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                state: Mutex::new(State::Idle),
            }),
        }
    }

    /// Process-wide instance.
    pub fn global() -> BackgroundExecutor {
        GLOBAL.get_or_init(BackgroundExecutor::new).clone()
    }

    /// Shuts down the process-wide instance, if it was ever created.
    pub fn shutdown_global() {
        if let Some(exec) = GLOBAL.get() {
            exec.shutdown();
        }
    }

    pub fn config(&self) -> ExecutorConfig {
        self.inner.cfg
    }

    /// True once the scheduler thread is up (and not yet shut down).
    pub fn is_running(&self) -> bool {
        matches!(*self.inner.lock(), State::Running(_))
    }

    pub fn is_shut_down(&self) -> bool {
        matches!(*self.inner.lock(), State::ShutDown)
    }

    /// Runs `fut` on the scheduler thread and blocks until it resolves.
    pub fn submit_and_await<F, T>(&self, fut: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = match self.inner.ensure_started() {
            Ok(shared) => shared,
            Err(ExecutorError::ShutDown) => return self.run_one_shot(fut),
            Err(e) => return Err(e),
        };
        if thread::current().id() == shared.thread_id {
            return Err(ExecutorError::Reentrant);
        }

        let limit = self.inner.cfg.call_timeout;
        let (tx, rx) = mpsc::sync_channel(1);
        let token = shared.token.clone();
        let join = shared.tracker.spawn_on(
            async move {
                let _ = tx.send(guarded(fut, limit, &token).await);
            },
            &shared.handle,
        );

        // The in-runtime timeout fires first; the slack covers a scheduler thread
        // blocked by user code that never yields.
        match rx.recv_timeout(limit + Duration::from_secs(1)) {
            Ok(res) => res,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                join.abort();
                warn!(?limit, "background execution did not yield before the hard timeout");
                Err(ExecutorError::Timeout(limit))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExecutorError::Cancelled),
        }
    }

    /// Schedules `fut` and returns immediately.
    pub fn submit<F, T>(&self, fut: F) -> Result<ExecutionHandle<T>, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_inner(fut, None)
    }

    /// Like [`submit`](Self::submit), and calls `notify.notify_one()` once the result is ready.
    pub fn submit_with_notify<F, T>(
        &self,
        fut: F,
        notify: Arc<Notify>,
    ) -> Result<ExecutionHandle<T>, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_inner(fut, Some(notify))
    }

    fn submit_inner<F, T>(
        &self,
        fut: F,
        notify: Option<Arc<Notify>>,
    ) -> Result<ExecutionHandle<T>, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = self.inner.ensure_started()?;
        let limit = self.inner.cfg.call_timeout;
        let (tx, rx) = oneshot::channel();
        let token = shared.token.clone();

        let join = shared.tracker.spawn_on(
            async move {
                let _ = tx.send(guarded(fut, limit, &token).await);
                if let Some(n) = notify {
                    n.notify_one();
                }
            },
            &shared.handle,
        );
        Ok(ExecutionHandle::new(rx, join.abort_handle()))
    }

    /// Stops the scheduler: cancels pending work, waits up to `shutdown_grace`, joins the thread.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn run_one_shot<F, T>(&self, fut: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(ExecutorError::ShutDown);
        }
        debug!("background executor is shut down; using a one-shot runtime");
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ExecutorError::Runtime(e.to_string()))?;
        let token = CancellationToken::new();
        rt.block_on(guarded(fut, self.inner.cfg.call_timeout, &token))
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_started(&self) -> Result<Shared, ExecutorError> {
        let mut state = self.lock();
        match &*state {
            State::Running(r) => return Ok(r.shared.clone()),
            State::ShutDown => return Err(ExecutorError::ShutDown),
            State::Idle => {}
        }

        let running = start_thread(&self.cfg)?;
        let shared = running.shared.clone();
        *state = State::Running(running);
        info!("background executor started");
        Ok(shared)
    }

    fn shutdown(&self) {
        let running = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, State::ShutDown) {
                State::Running(r) => r,
                _ => return,
            }
        };

        let Running {
            shared,
            stop,
            thread,
        } = running;
        shared.token.cancel();
        if let Some(tx) = stop {
            let _ = tx.send(());
        }
        if let Some(t) = thread {
            if t.thread().id() == thread::current().id() {
                return;
            }
            if t.join().is_err() {
                warn!("background executor thread panicked during shutdown");
            }
        }
        info!("background executor stopped");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn start_thread(cfg: &ExecutorConfig) -> Result<Running, ExecutorError> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<Handle, String>>();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    let thread = {
        let tracker = tracker.clone();
        let grace = cfg.shutdown_grace;
        thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let rt = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(rt.handle().clone()));

                rt.block_on(async move {
                    // Resolves on explicit stop or when the owner is gone.
                    let _ = stop_rx.await;
                    tracker.close();
                    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
                        warn!(
                            pending = tracker.len(),
                            "background work did not unwind within grace"
                        );
                    }
                });
                rt.shutdown_timeout(grace);
            })
            .map_err(|e| ExecutorError::Runtime(e.to_string()))?
    };
    let thread_id = thread.thread().id();

    let handle = wait_ready(&ready_rx, cfg.startup_timeout)?;
    Ok(Running {
        shared: Shared {
            handle,
            thread_id,
            token,
            tracker,
        },
        stop: Some(stop_tx),
        thread: Some(thread),
    })
}

/// Waits for the scheduler thread to hand over its runtime handle.
fn wait_ready(
    ready_rx: &mpsc::Receiver<Result<Handle, String>>,
    timeout: Duration,
) -> Result<Handle, ExecutorError> {
    match ready_rx.recv_timeout(timeout) {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(msg)) => Err(ExecutorError::Runtime(msg)),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(?timeout, "background executor did not start in time");
            Err(ExecutorError::StartupTimeout(timeout))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExecutorError::Runtime(
            "executor thread exited during startup".into(),
        )),
    }
}

/// Runs `fut` with the hard timeout, cancellation and panic capture applied.
async fn guarded<F, T>(fut: F, limit: Duration, token: &CancellationToken) -> Result<T, ExecutorError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        res = tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()) => match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(ExecutorError::Panicked(panic_message(panic.as_ref()))),
            Err(_elapsed) => Err(ExecutorError::Timeout(limit)),
        },
        _ = token.cancelled() => Err(ExecutorError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn quick() -> BackgroundExecutor {
        BackgroundExecutor::with_config(ExecutorConfig {
            startup_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(200),
        })
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn slow_startup_times_out() {
        let (tx, rx) = mpsc::channel::<Result<Handle, String>>();
        let limit = Duration::from_millis(20);
        assert!(matches!(
            wait_ready(&rx, limit),
            Err(ExecutorError::StartupTimeout(d)) if d == limit
        ));
        drop(tx);
    }

    #[test]
    fn failed_startup_is_a_runtime_error() {
        let (tx, rx) = mpsc::channel::<Result<Handle, String>>();
        tx.send(Err("no reactor".into())).unwrap();
        assert_eq!(
            wait_ready(&rx, Duration::from_secs(1)).err(),
            Some(ExecutorError::Runtime("no reactor".into()))
        );

        drop(tx);
        assert!(matches!(
            wait_ready(&rx, Duration::from_secs(1)),
            Err(ExecutorError::Runtime(_))
        ));
    }

    #[test]
    fn startup_timeout_surfaces_from_submission() {
        let exec = BackgroundExecutor::with_config(ExecutorConfig {
            startup_timeout: Duration::ZERO,
            ..ExecutorConfig::default()
        });
        // Either the thread won the race or the zero budget expired; never a hang.
        match exec.submit_and_await(async { 1 }) {
            Ok(v) => assert_eq!(v, 1),
            Err(e) => assert!(matches!(e, ExecutorError::StartupTimeout(d) if d == Duration::ZERO)),
        }
    }

    #[test]
    fn starts_lazily_and_returns_value() {
        let exec = quick();
        assert!(!exec.is_running());
        let got = exec.submit_and_await(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            42
        });
        assert_eq!(got, Ok(42));
        assert!(exec.is_running());
    }

    #[test]
    fn error_values_come_back_to_the_caller() {
        let exec = quick();
        let got = exec.submit_and_await(async { Err::<i32, String>("x".into()) });
        assert_eq!(got, Ok(Err("x".to_string())));
    }

    #[test]
    fn hard_timeout_cancels_the_future() {
        let exec = quick();
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let got = exec.submit_and_await(async move {
            let _guard = guard;
            std::future::pending::<()>().await
        });
        assert_eq!(got, Err(ExecutorError::Timeout(Duration::from_millis(200))));
        thread::sleep(Duration::from_millis(50));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn panics_are_captured() {
        let exec = quick();
        let got = exec.submit_and_await(async { panic!("kaboom") });
        assert_eq!(got, Err(ExecutorError::Panicked("kaboom".into())));
    }

    #[test]
    fn nested_blocking_submission_is_rejected() {
        let exec = quick();
        let inner = exec.clone();
        let got = exec.submit_and_await(async move { inner.submit_and_await(async { 1 }) });
        assert_eq!(got, Ok(Err(ExecutorError::Reentrant)));
    }

    #[test]
    fn many_callers_share_one_thread() {
        let exec = quick();
        let ids: Vec<_> = (0..4)
            .map(|_| {
                let exec = exec.clone();
                thread::spawn(move || exec.submit_and_await(async { thread::current().id() }))
            })
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn shutdown_is_idempotent_and_falls_back_to_one_shot() {
        let exec = quick();
        assert_eq!(exec.submit_and_await(async { 1 }), Ok(1));
        exec.shutdown();
        exec.shutdown();
        assert!(exec.is_shut_down());
        assert_eq!(exec.submit_and_await(async { 7 }), Ok(7));
        assert!(matches!(exec.submit(async { 7 }), Err(ExecutorError::ShutDown)));
    }

    #[test]
    fn shutdown_cancels_pending_handles() {
        let exec = quick();
        let notify = Arc::new(Notify::new());
        let mut handle = exec
            .submit_with_notify(std::future::pending::<()>(), notify)
            .unwrap();
        assert!(handle.try_take().is_none());
        exec.shutdown();
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        assert_eq!(rt.block_on(handle.wait()), Err(ExecutorError::Cancelled));
    }

    #[tokio::test]
    async fn handle_notifies_on_completion() {
        let exec = quick();
        let notify = Arc::new(Notify::new());
        let mut handle = exec
            .submit_with_notify(async { "done" }, notify.clone())
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
        assert_eq!(handle.try_take(), Some(Ok("done")));
        let exec2 = exec.clone();
        tokio::task::spawn_blocking(move || exec2.shutdown())
            .await
            .unwrap();
    }
}
