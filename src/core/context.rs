//! # Where runners execute.
//!
//! The runner state machine is written once; an [`ExecutionContext`] decides what
//! carries it.
//!
//! ```text
//! ExecutionMode::Tasks    spawn(name, fut) ──► tokio::spawn on the caller's runtime
//! ExecutionMode::Threads  spawn(name, fut) ──► OS thread "conductor-runner-<name>"
//!                                                └─ own current-thread runtime
//!
//! both:  supervised(fut, kill) = select { fut (panic → Panicked), kill → Abandoned }
//!        result ──oneshot──► RunnerHandle::join()
//! ```
//!
//! Cancelling the kill token drops the runner
//! future wherever it is suspended; its in-flight tasks are abandoned unreported.

use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::config::ExecutionMode;
use crate::error::{RunnerError, RuntimeError};
use crate::executor::panic_message;

/// A runner loop ready to be driven.
pub(crate) type RunnerFuture = BoxFuture<'static, Result<(), RunnerError>>;

/// Spawn capability shared by both execution modes.
pub(crate) trait ExecutionContext: Send + Sync {
    /// Starts `fut` under `name`.
    fn spawn(&self, name: &str, fut: RunnerFuture) -> Result<RunnerHandle, RuntimeError>;
}

/// Joins or aborts one spawned runner.
pub(crate) struct RunnerHandle {
    name: String,
    kill: CancellationToken,
    done: oneshot::Receiver<Result<(), RunnerError>>,
}

impl RunnerHandle {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Token that abandons the runner when cancelled.
    pub(crate) fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    /// Waits for the runner to leave; yields its name with the exit result.
    pub(crate) async fn join(self) -> (String, Result<(), RunnerError>) {
        let res = self.done.await.unwrap_or(Err(RunnerError::Abandoned));
        (self.name, res)
    }
}

/// Runners as tokio tasks.
pub(crate) struct TaskContext;

impl ExecutionContext for TaskContext {
    fn spawn(&self, name: &str, fut: RunnerFuture) -> Result<RunnerHandle, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        let kill = CancellationToken::new();
        let token = kill.clone();

        tokio::spawn(async move {
            let _ = tx.send(supervised(fut, token).await);
        });
        Ok(RunnerHandle {
            name: name.to_string(),
            kill,
            done: rx,
        })
    }
}

/// Runners on dedicated OS threads.
pub(crate) struct ThreadContext;

impl ExecutionContext for ThreadContext {
    fn spawn(&self, name: &str, fut: RunnerFuture) -> Result<RunnerHandle, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        let kill = CancellationToken::new();
        let token = kill.clone();

        std::thread::Builder::new()
            .name(format!("conductor-runner-{name}"))
            .spawn(move || {
                let rt = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(RunnerError::Runtime(e.to_string())));
                        return;
                    }
                };
                let res = rt.block_on(supervised(fut, token));
                let _ = tx.send(res);
                // Abandoned blocking calls must not hold the thread.
                rt.shutdown_background();
            })
            .map_err(|e| RuntimeError::Spawn {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(RunnerHandle {
            name: name.to_string(),
            kill,
            done: rx,
        })
    }
}

/// Context for `mode`.
pub(crate) fn for_mode(mode: ExecutionMode) -> Box<dyn ExecutionContext> {
    match mode {
        ExecutionMode::Tasks => Box::new(TaskContext),
        ExecutionMode::Threads => Box::new(ThreadContext),
    }
}

async fn supervised(fut: RunnerFuture, kill: CancellationToken) -> Result<(), RunnerError> {
    tokio::select! {
        res = AssertUnwindSafe(fut).catch_unwind() => {
            res.unwrap_or_else(|panic| Err(RunnerError::Panicked(panic_message(panic.as_ref()))))
        }
        _ = kill.cancelled() => Err(RunnerError::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn boom() -> Result<(), RunnerError> {
        panic!("runner bug")
    }

    async fn check_mode(mode: ExecutionMode) {
        let ctx = for_mode(mode);

        let ok = ctx.spawn("ok", async { Ok::<_, RunnerError>(()) }.boxed()).unwrap();
        assert_eq!(ok.name(), "ok");
        assert!(matches!(ok.join().await, (name, Ok(())) if name == "ok"));

        let panicked = ctx
            .spawn("boom", async { boom() }.boxed())
            .unwrap();
        assert!(matches!(panicked.join().await.1, Err(RunnerError::Panicked(msg)) if msg == "runner bug"));

        let stuck = ctx
            .spawn(
                "stuck",
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<_, RunnerError>(())
                }
                .boxed(),
            )
            .unwrap();
        stuck.kill_token().cancel();
        assert!(matches!(stuck.join().await.1, Err(RunnerError::Abandoned)));
    }

    #[tokio::test]
    async fn task_context_reports_exit_panic_and_abort() {
        check_mode(ExecutionMode::Tasks).await;
    }

    #[tokio::test]
    async fn thread_context_reports_exit_panic_and_abort() {
        check_mode(ExecutionMode::Threads).await;
    }
}
