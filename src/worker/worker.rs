//! # Worker: one user function bound to one task type.
//!
//! A [`Worker`] pairs a task type with a user function and its code-level
//! defaults. The call convention is decided by the constructor and cached:
//!
//! | constructor | binding | function |
//! |---|---|---|
//! | [`Worker::new`] | envelope | `Fn(&TaskEnvelope) -> Result<R, E>` |
//! | [`Worker::new_async`] | envelope | `Fn(TaskEnvelope) -> impl Future<Output = Result<R, E>>` |
//! | [`Worker::with_args`] | named | `Fn(Args) -> Result<R, E>` |
//! | [`Worker::with_args_async`] | named | `Fn(Args) -> impl Future<Output = Result<R, E>>` |
//!
//! where `R: Into<UserReturn>` and `E: Into<TaskError>`.
//!
//! ## Example
//! ```rust
//! use conductor_worker::{Args, Param, TaskEnvelope, TaskError, Worker};
//! use serde_json::{json, Value};
//!
//! let echo = Worker::new("echo", |task: &TaskEnvelope| {
//!     Ok::<_, TaskError>(Value::Object(task.input_data.clone()))
//! });
//!
//! let greet = Worker::with_args("greet", vec![Param::new("name")], |args: Args| {
//!     let name: String = args.get("name")?;
//!     Ok::<_, TaskError>(json!({ "greeting": format!("hello {name}") }))
//! });
//!
//! assert!(!echo.is_async());
//! assert_eq!(greet.task_type(), "greet");
//! ```

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::WorkerDefaults;
use crate::error::TaskError;
use crate::executor::{panic_message, BackgroundExecutor};
use crate::model::{TaskDef, TaskEnvelope, TaskOutcome};
use crate::worker::output::{normalize, UserReturn, WorkerResult};
use crate::worker::params::{Args, Binding, Param};

/// Future produced by async worker functions.
pub type BoxWorkerFuture = BoxFuture<'static, WorkerResult>;

type SyncFn<I> = Arc<dyn Fn(I) -> WorkerResult + Send + Sync>;
type AsyncFn<I> = Arc<dyn Fn(I) -> BoxWorkerFuture + Send + Sync>;

enum Call<I> {
    Sync(SyncFn<I>),
    Async(AsyncFn<I>),
}

impl<I> Clone for Call<I> {
    fn clone(&self) -> Self {
        match self {
            Call::Sync(f) => Call::Sync(Arc::clone(f)),
            Call::Async(f) => Call::Async(Arc::clone(f)),
        }
    }
}

#[derive(Clone)]
enum Handler {
    Envelope(Call<TaskEnvelope>),
    Named { params: Vec<Param>, call: Call<Args> },
}

/// Outcome of starting an invocation.
pub enum Invocation {
    /// The function ran to completion (synchronous functions).
    Ready(WorkerResult),
    /// The function returned a future that still has to be driven.
    Deferred(BoxWorkerFuture),
}

/// A user function registered for one task type.
#[derive(Clone)]
pub struct Worker {
    task_type: String,
    handler: Handler,
    defaults: WorkerDefaults,
    task_def: Option<TaskDef>,
}

impl Worker {
    /// Sync function receiving the whole envelope.
    pub fn new<F, R, E>(task_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TaskEnvelope) -> Result<R, E> + Send + Sync + 'static,
        R: Into<UserReturn>,
        E: Into<TaskError>,
    {
        let call: SyncFn<TaskEnvelope> =
            Arc::new(move |task: TaskEnvelope| f(&task).map(Into::into).map_err(Into::into));
        Self::from_handler(task_type, Handler::Envelope(Call::Sync(call)))
    }

    /// Async function receiving the whole envelope.
    pub fn new_async<F, Fut, R, E>(task_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Into<UserReturn>,
        E: Into<TaskError>,
    {
        let call: AsyncFn<TaskEnvelope> = Arc::new(move |task: TaskEnvelope| {
            f(task).map(|r| r.map(Into::into).map_err(Into::into)).boxed()
        });
        Self::from_handler(task_type, Handler::Envelope(Call::Async(call)))
    }

    /// Sync function receiving named parameters bound from the input map.
    pub fn with_args<F, R, E>(task_type: impl Into<String>, params: Vec<Param>, f: F) -> Self
    where
        F: Fn(Args) -> Result<R, E> + Send + Sync + 'static,
        R: Into<UserReturn>,
        E: Into<TaskError>,
    {
        let call: SyncFn<Args> =
            Arc::new(move |args: Args| f(args).map(Into::into).map_err(Into::into));
        Self::from_handler(
            task_type,
            Handler::Named {
                params,
                call: Call::Sync(call),
            },
        )
    }

    /// Async function receiving named parameters bound from the input map.
    pub fn with_args_async<F, Fut, R, E>(
        task_type: impl Into<String>,
        params: Vec<Param>,
        f: F,
    ) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Into<UserReturn>,
        E: Into<TaskError>,
    {
        let call: AsyncFn<Args> = Arc::new(move |args: Args| {
            f(args).map(|r| r.map(Into::into).map_err(Into::into)).boxed()
        });
        Self::from_handler(
            task_type,
            Handler::Named {
                params,
                call: Call::Async(call),
            },
        )
    }

    fn from_handler(task_type: impl Into<String>, handler: Handler) -> Self {
        Self {
            task_type: task_type.into(),
            handler,
            defaults: WorkerDefaults::default(),
            task_def: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.defaults.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.poll_timeout = timeout;
        self
    }

    /// Maximum concurrent executions (minimum 1).
    pub fn with_thread_count(mut self, n: usize) -> Self {
        self.defaults.thread_count = n.max(1);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.defaults.domain = Some(domain.into());
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.defaults.worker_id = Some(id.into());
        self
    }

    pub fn with_lease_extension(mut self, enabled: bool) -> Self {
        self.defaults.lease_extend_enabled = enabled;
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.defaults.paused = paused;
        self
    }

    /// Registers `def` (or a minimal definition) at startup.
    pub fn with_task_def(mut self, def: Option<TaskDef>) -> Self {
        self.defaults.register_task_def = true;
        self.task_def = def;
        self
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn defaults(&self) -> &WorkerDefaults {
        &self.defaults
    }

    /// Definition registered when auto-registration is on.
    pub fn task_def(&self) -> TaskDef {
        self.task_def
            .clone()
            .unwrap_or_else(|| TaskDef::new(self.task_type.clone()))
    }

    /// The cached call convention.
    pub fn binding(&self) -> Binding {
        match &self.handler {
            Handler::Envelope(_) => Binding::Envelope,
            Handler::Named { params, .. } => Binding::Named(params.clone()),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(
            self.handler,
            Handler::Envelope(Call::Async(_)) | Handler::Named { call: Call::Async(_), .. }
        )
    }

    /// Invokes the function. Sync functions run here; async ones return their future.
    ///
    /// Panics in the function (or in building its future) become `TaskError::Failed`.
    pub fn start(&self, task: &TaskEnvelope) -> Invocation {
        match &self.handler {
            Handler::Envelope(call) => invoke(call, task.clone()),
            Handler::Named { params, call } => invoke(call, Binding::bind(params, task)),
        }
    }

    /// Runs the function to an outcome, blocking on async functions via `executor`.
    pub fn execute(
        &self,
        task: &TaskEnvelope,
        worker_id: &str,
        executor: &BackgroundExecutor,
    ) -> TaskOutcome {
        let result = match self.start(task) {
            Invocation::Ready(result) => result,
            Invocation::Deferred(fut) => executor
                .submit_and_await(fut)
                .map_err(TaskError::from)
                .and_then(|r| r),
        };
        normalize(task, result, worker_id)
    }
}

fn invoke<I>(call: &Call<I>, input: I) -> Invocation {
    match call {
        Call::Sync(f) => Invocation::Ready(guard(|| f(input)).and_then(|r| r)),
        Call::Async(f) => match guard(|| f(input)) {
            Ok(fut) => Invocation::Deferred(fut),
            Err(e) => Invocation::Ready(Err(e)),
        },
    }
}

fn guard<T>(f: impl FnOnce() -> T) -> Result<T, TaskError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| TaskError::Failed {
        message: format!("task function panicked: {}", panic_message(panic.as_ref())),
        trace: None,
    })
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("task_type", &self.task_type)
            .field("async", &self.is_async())
            .field("binding", &self.binding())
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::model::{TaskInProgress, TaskStatus};
    use serde_json::{json, Value};

    fn task() -> TaskEnvelope {
        TaskEnvelope::new("t-1", "wf-1", "orders").with_input("n", 20)
    }

    fn executor() -> BackgroundExecutor {
        BackgroundExecutor::with_config(ExecutorConfig {
            call_timeout: Duration::from_millis(200),
            ..ExecutorConfig::default()
        })
    }

    #[test]
    fn envelope_binding_sees_the_whole_task() {
        let w = Worker::new("orders", |t: &TaskEnvelope| {
            Ok::<_, TaskError>(json!({ "id": t.task_id, "poll": t.poll_count }))
        });
        assert_eq!(w.binding(), Binding::Envelope);
        let outcome = w.execute(&task(), "w", &executor());
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.output_data["id"], json!("t-1"));
    }

    #[test]
    fn named_binding_with_default() {
        let w = Worker::with_args(
            "orders",
            vec![Param::new("n"), Param::new("factor").with_default(2)],
            |args: Args| {
                let n: i64 = args.get("n")?;
                let factor: i64 = args.get("factor")?;
                Ok::<_, TaskError>(n * factor)
            },
        );
        let outcome = w.execute(&task(), "w", &executor());
        assert_eq!(Value::Object(outcome.output_data), json!({"result": 40}));
    }

    #[test]
    fn async_functions_share_the_normalization_path() {
        let w = Worker::new_async("orders", |t: TaskEnvelope| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, TaskError>(TaskInProgress::new(Duration::from_secs(5)).with_output(t.input_data))
        });
        assert!(w.is_async());
        let outcome = w.execute(&task(), "w", &executor());
        assert_eq!(outcome.status, TaskStatus::InProgress);
        assert_eq!(outcome.callback_after_seconds, Some(5));
        assert_eq!(outcome.output_data["n"], json!(20));
    }

    #[test]
    fn executor_timeout_becomes_failed() {
        let w = Worker::with_args_async("orders", vec![], |_args: Args| async {
            std::future::pending::<Result<Value, TaskError>>().await
        });
        let outcome = w.execute(&task(), "w", &executor());
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome
            .reason_for_incompletion
            .unwrap()
            .contains("timed out"));
    }

    #[test]
    fn panics_become_failed_not_crashes() {
        let w = Worker::new("orders", |_t: &TaskEnvelope| -> Result<Value, TaskError> {
            panic!("index out of bounds")
        });
        let outcome = w.execute(&task(), "w", &executor());
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome
            .reason_for_incompletion
            .unwrap()
            .contains("index out of bounds"));
    }

    #[test]
    fn non_retryable_errors_are_terminal() {
        let w = Worker::new("orders", |_t: &TaskEnvelope| -> Result<(), TaskError> {
            Err(TaskError::non_retryable("card expired"))
        });
        let outcome = w.execute(&task(), "w", &executor());
        assert_eq!(outcome.status, TaskStatus::FailedWithTerminalError);
        assert_eq!(outcome.reason_for_incompletion.as_deref(), Some("card expired"));
    }

    #[test]
    fn builder_sets_code_defaults() {
        let w = Worker::new("orders", |_t: &TaskEnvelope| Ok::<_, TaskError>(()))
            .with_thread_count(0)
            .with_poll_interval(Duration::from_millis(250))
            .with_domain("eu")
            .with_task_def(None);
        assert_eq!(w.defaults().thread_count, 1);
        assert_eq!(w.defaults().poll_interval, Duration::from_millis(250));
        assert_eq!(w.defaults().domain.as_deref(), Some("eu"));
        assert!(w.defaults().register_task_def);
        assert_eq!(w.task_def().name, "orders");
    }
}
