//! # conductor-worker
//!
//! Task polling and execution runtime for [Conductor](https://conductor-oss.org)
//! workers: poll the server for tasks, run user functions under a concurrency
//! limit, and report outcomes back, reliably.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │    Worker    │   │    Worker    │   │    Worker    │
//!     │  "orders"    │   │  "billing"   │   │  "emails"    │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - ConfigResolver (defaults < all.* < <taskType>.* overrides)     │
//! │  - Bus + SubscriberSet (events → LogWriter, MetricsCollector, …)  │
//! │  - ExecutionMode: tokio tasks | dedicated threads                 │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  TaskRunner  │   │  TaskRunner  │   │  TaskRunner  │
//!     │ poll → exec  │   │ poll → exec  │   │ poll → exec  │
//!     │   → report   │   │   → report   │   │   → report   │
//!     └──┬────────┬──┘   └──┬────────┬──┘   └──┬────────┬──┘
//!        │        │         │        │         │        │
//!        │        └─────────┼────────┴─────────┼────────┴──► BackgroundExecutor
//!        │                  │                  │               (one thread, async fns)
//!        ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  TaskClient (HttpTaskClient: pooled reqwest client, token cache,  │
//! │              per-endpoint 401 refresh-and-retry)                  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Lifecycle of one task
//! ```text
//! batch_poll(count = thread_count − in_flight)
//!   └─► TaskEnvelope ──► Worker::start
//!                          ├─ sync fn  → per-runner sync pool
//!                          └─ async fn → BackgroundExecutor (hard timeout)
//!                     result ──► normalize ──► TaskOutcome
//!                                 ├─ Ok(value)              → COMPLETED, output map
//!                                 ├─ Ok(TaskInProgress)     → IN_PROGRESS, callback delay
//!                                 ├─ Err(NonRetryable)      → FAILED_WITH_TERMINAL_ERROR
//!                                 └─ Err(other) / panic     → FAILED (+ one log line)
//!                     update_task(outcome)  (bounded retries, then dropped)
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                        |
//! |-------------------|---------------------------------------------------------------|-------------------------------------------|
//! | **Workers**       | Envelope or named-parameter functions, sync or async.         | [`Worker`], [`Args`], [`Param`]           |
//! | **Outcomes**      | Plain values, full outcomes, or "in progress" markers.        | [`UserReturn`], [`TaskOutcome`]           |
//! | **Supervision**   | One runner per task type, graceful shutdown with grace.       | [`Supervisor`], [`SupervisorBuilder`]     |
//! | **Configuration** | Environment overrides resolved per property, live pause.      | [`ConfigResolver`], [`ClientConfig`]      |
//! | **Transport**     | HTTP client with token caching and 401 backoff.               | [`TaskClient`], [`HttpTaskClient`]        |
//! | **Policies**      | Backoff, jitter, update retries, 401 retries.                 | [`BackoffPolicy`], [`AuthRetryPolicy`]    |
//! | **Events**        | Runtime events, subscribers, Prometheus-style metrics.        | [`Subscribe`], [`MetricsCollector`]       |
//! | **Errors**        | Typed errors per layer.                                       | [`TaskError`], [`TransportError`], [`RuntimeError`] |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], a `tracing`-backed subscriber.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use conductor_worker::{
//!     Args, Param, Subscribe, Supervisor, SupervisorConfig, TaskEnvelope, TaskError, Worker,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let greet = Worker::with_args("greet", vec![Param::new("name")], |args: Args| {
//!         let name: String = args.get("name")?;
//!         Ok::<_, TaskError>(json!({ "greeting": format!("hello {name}") }))
//!     })
//!     .with_thread_count(4);
//!
//!     let echo = Worker::new_async("echo", |task: TaskEnvelope| async move {
//!         Ok::<_, TaskError>(serde_json::Value::Object(task.input_data))
//!     });
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(conductor_worker::LogWriter)];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!
//!     Supervisor::builder(SupervisorConfig::default())
//!         .with_workers(vec![greet, echo])
//!         .with_subscribers(subs)
//!         .build()?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod core;
mod error;
mod events;
mod executor;
mod model;
mod policies;
mod worker;

pub mod subscribers;

// ---- Public re-exports ----

pub use client::{
    normalize_path, AuthDecision, AuthRetryState, HttpTaskClient, PollRequest, TaskClient,
    AUTH_HEADER, TOKEN_PATH,
};
pub use config::{
    auth_retry_from, default_worker_id, parse_bool, parse_count, parse_millis, ClientConfig,
    ConfigProvider, ConfigResolver, EnvProvider, MapProvider, WorkerDefaults, WorkerProperty,
    WorkerSettings, DEFAULT_SERVER_URL, GLOBAL_SCOPE, KEY_PREFIX,
};
pub use core::{ExecutionMode, MetricsSettings, Supervisor, SupervisorBuilder, SupervisorConfig};
pub use error::{ExecutorError, RunnerError, RuntimeError, TaskError, TransportError};
pub use events::{Bus, Event, EventKind};
pub use executor::{BackgroundExecutor, ExecutionHandle, ExecutorConfig};
pub use model::{
    TaskDef, TaskEnvelope, TaskExecLog, TaskInProgress, TaskOutcome, TaskStatus,
    MIN_CALLBACK_AFTER,
};
pub use policies::{
    AuthRetryPolicy, AuthStopBehavior, BackoffPolicy, JitterPolicy, UpdateRetryPolicy,
    MAX_PROPORTIONAL_PERCENT,
};
pub use subscribers::{MetricsCollector, Subscribe, SubscriberSet};
pub use worker::{
    normalize, Args, Binding, BoxWorkerFuture, Invocation, Param, UserReturn, Worker,
    WorkerResult, RESULT_KEY, SERIALIZATION_ERROR_KEY,
};

#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
