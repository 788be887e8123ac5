//! Error types used by the worker runtime, its transport, and user task functions.
//!
//! - [`TaskError`]: raised by user task functions; becomes a FAILED or
//!   FAILED_WITH_TERMINAL_ERROR outcome, never a runner crash.
//! - [`TransportError`]: poll/update/token calls against the server.
//! - [`ExecutorError`]: the background executor (timeouts, cancellation, panics).
//! - [`RuntimeError`]: supervisor-level failures.
//!
//! Every enum offers `as_label()` (stable snake_case for logs/metrics).

use std::time::Duration;
use thiserror::Error;

use crate::policies::AuthStopBehavior;

/// # Errors produced by user task functions.
///
/// `NonRetryable` maps to `FAILED_WITH_TERMINAL_ERROR`; everything else maps to `FAILED`.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// The task must not be retried by the server.
    #[error("{message}")]
    NonRetryable {
        /// Reason reported to the server (may be empty).
        message: String,
    },

    /// Ordinary failure; retry eligibility is decided server-side.
    #[error("{message}")]
    Failed {
        /// Reason reported to the server.
        message: String,
        /// Full error chain / panic location, attached as the outcome's log line.
        trace: Option<String>,
    },
}

impl TaskError {
    /// Terminal failure with a reason.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        TaskError::NonRetryable {
            message: message.into(),
        }
    }

    /// Retryable failure with a reason and no trace.
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
            trace: None,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use conductor_worker::TaskError;
    ///
    /// assert_eq!(TaskError::non_retryable("bad input").as_label(), "task_non_retryable");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::NonRetryable { .. } => "task_non_retryable",
            TaskError::Failed { .. } => "task_failed",
        }
    }

    /// Indicates whether the server may retry the task.
    ///
    /// # Example
    /// ```
    /// use conductor_worker::TaskError;
    ///
    /// assert!(TaskError::failed("flaky").is_retryable());
    /// assert!(!TaskError::non_retryable("nope").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Failed { .. })
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Failed {
            message: err.to_string(),
            trace: Some(format!("{err:?}")),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::failed(format!("invalid task input: {err}"))
    }
}

/// # Errors produced by server calls.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection, DNS, TLS or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status other than a handled 401.
    #[error("server returned {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body (truncated by the caller if needed).
        body: String,
    },

    /// 401 without retry (policy not applicable or already exhausted).
    #[error("unauthorized: {path}")]
    Unauthorized {
        /// Normalized request path.
        path: String,
    },

    /// 401 retries ran out for this endpoint.
    #[error("authentication retries exhausted for {path} after {attempts} attempts")]
    AuthExhausted {
        /// Normalized request path.
        path: String,
        /// Attempts made.
        attempts: u32,
        /// What the owning runner should do next.
        stop: AuthStopBehavior,
    },

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid client configuration (bad URL, unreadable certificate, ...).
    #[error("client configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> String {
        match self {
            TransportError::Network(_) => "error".to_string(),
            TransportError::Status { code, .. } => code.to_string(),
            TransportError::Unauthorized { .. } => "401".to_string(),
            TransportError::AuthExhausted { .. } => "auth_exhausted".to_string(),
            TransportError::Decode(_) => "decode_error".to_string(),
            TransportError::Config(_) => "config_error".to_string(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Status { code, .. } => Some(*code),
            TransportError::Unauthorized { .. } | TransportError::AuthExhausted { .. } => Some(401),
            _ => None,
        }
    }

    /// True when the runner owning this call must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::AuthExhausted {
                stop: AuthStopBehavior::StopWorker,
                ..
            }
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if err.is_builder() {
            TransportError::Config(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// # Errors produced by the background executor.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// The scheduler thread did not come up in time.
    #[error("background executor did not start within {0:?}")]
    StartupTimeout(Duration),

    /// Submitted work exceeded the hard per-invocation ceiling and was cancelled.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Submitted work was cancelled (executor shutdown or explicit abort).
    #[error("execution cancelled")]
    Cancelled,

    /// Submitted work panicked.
    #[error("execution panicked: {0}")]
    Panicked(String),

    /// Executor is shut down and a one-shot fallback is impossible from this context.
    #[error("background executor is shut down")]
    ShutDown,

    /// Blocking submission from the scheduler thread itself would deadlock.
    #[error("blocking submission from the background executor thread")]
    Reentrant,

    /// Runtime construction failed.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ExecutorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecutorError::StartupTimeout(_) => "executor_startup_timeout",
            ExecutorError::Timeout(_) => "executor_timeout",
            ExecutorError::Cancelled => "executor_cancelled",
            ExecutorError::Panicked(_) => "executor_panicked",
            ExecutorError::ShutDown => "executor_shut_down",
            ExecutorError::Reentrant => "executor_reentrant",
            ExecutorError::Runtime(_) => "executor_runtime",
        }
    }
}

impl From<ExecutorError> for TaskError {
    fn from(err: ExecutorError) -> Self {
        TaskError::Failed {
            message: err.to_string(),
            trace: None,
        }
    }
}

/// # Errors produced by the supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some runners were force-terminated.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of runners that did not stop in time.
        stuck: Vec<String>,
    },

    /// Nothing to run.
    #[error("no workers registered")]
    NoWorkers,

    /// A runner could not be spawned.
    #[error("failed to spawn runner {name}: {reason}")]
    Spawn {
        /// Runner name.
        name: String,
        /// Underlying reason.
        reason: String,
    },

    /// Client construction failed.
    #[error(transparent)]
    Client(#[from] TransportError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use conductor_worker::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::NoWorkers => "runtime_no_workers",
            RuntimeError::Spawn { .. } => "runtime_spawn_failed",
            RuntimeError::Client(_) => "runtime_client",
        }
    }
}

/// Reason a runner left its loop.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// 401 retries exhausted with `StopWorker` behavior.
    #[error("runner stopped: {0}")]
    Fatal(TransportError),

    /// The runner loop itself panicked.
    #[error("runner panicked: {0}")]
    Panicked(String),

    /// Killed after the shutdown grace period; in-flight tasks were abandoned.
    #[error("runner abandoned after grace period")]
    Abandoned,

    /// The runner's dedicated runtime could not be built.
    #[error("runner runtime error: {0}")]
    Runtime(String),
}

impl RunnerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunnerError::Fatal(_) => "runner_fatal",
            RunnerError::Panicked(_) => "runner_panicked",
            RunnerError::Abandoned => "runner_abandoned",
            RunnerError::Runtime(_) => "runner_runtime",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_chain_becomes_trace() {
        let err = anyhow::anyhow!("db down").context("loading order");
        let task_err: TaskError = err.into();
        match task_err {
            TaskError::Failed { message, trace } => {
                assert_eq!(message, "loading order");
                assert!(trace.unwrap().contains("db down"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transport_labels() {
        assert_eq!(TransportError::Network("x".into()).as_label(), "error");
        let status = TransportError::Status {
            code: 503,
            body: String::new(),
        };
        assert_eq!(status.as_label(), "503");
        assert_eq!(status.status_code(), Some(503));
    }

    #[test]
    fn only_stop_worker_exhaustion_is_fatal() {
        let stop = TransportError::AuthExhausted {
            path: "/tasks".into(),
            attempts: 3,
            stop: AuthStopBehavior::StopWorker,
        };
        let cont = TransportError::AuthExhausted {
            path: "/tasks".into(),
            attempts: 3,
            stop: AuthStopBehavior::Continue,
        };
        assert!(stop.is_fatal());
        assert!(!cont.is_fatal());
        assert!(!TransportError::Unauthorized { path: "/x".into() }.is_fatal());
    }
}
