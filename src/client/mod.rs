//! Server transport: the [`TaskClient`] seam and its HTTP implementation.
//!
//! Runners only see [`TaskClient`]; [`HttpTaskClient`] is the production
//! implementation, tests may plug in their own.
//!
//! ## Contents
//! - [`TaskClient`], [`PollRequest`] what a runner needs from the server
//! - [`HttpTaskClient`] reqwest-based transport with token caching
//! - [`AuthRetryState`], [`AuthDecision`] per-endpoint 401 refresh-and-retry bookkeeping

mod auth;
mod http;

pub use auth::{normalize_path, AuthDecision, AuthRetryState, TOKEN_PATH};
pub use http::{HttpTaskClient, AUTH_HEADER};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::model::{TaskDef, TaskEnvelope, TaskOutcome};

/// Parameters of one batch poll.
#[derive(Clone, Debug, PartialEq)]
pub struct PollRequest {
    pub task_type: String,
    pub worker_id: String,
    pub domain: Option<String>,
    /// Maximum number of tasks to hand out.
    pub count: usize,
    /// How long the server may hold the request open waiting for work.
    pub timeout: Duration,
}

/// Server operations used by the runtime.
///
/// Implementations must be safe to share between runners.
#[async_trait]
pub trait TaskClient: Send + Sync + 'static {
    /// Polls up to `req.count` tasks. No work is `Ok(vec![])`, never an error.
    async fn batch_poll(&self, req: &PollRequest) -> Result<Vec<TaskEnvelope>, TransportError>;

    /// Reports one outcome (including lease extensions).
    async fn update_task(&self, outcome: &TaskOutcome) -> Result<(), TransportError>;

    /// Registers task definitions.
    async fn register_task_defs(&self, defs: &[TaskDef]) -> Result<(), TransportError>;
}
