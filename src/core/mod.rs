//! Runtime core: runners, their execution contexts, and the supervisor.
//!
//! The public API from this module is [`Supervisor`] (built with
//! [`SupervisorBuilder`]) and its [`SupervisorConfig`].
//!
//! Internal modules:
//! - [`runner`]: the poll → execute → report loop of one task type;
//! - [`inflight`]: bookkeeping of dispatched executions and lease deadlines;
//! - [`pool`]: per-runner threads for synchronous user functions;
//! - [`context`]: tokio-task vs. dedicated-thread execution of runners;
//! - [`supervisor`]: spawns runners, fans out events, enforces the shutdown grace;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod config;
mod context;
mod inflight;
mod pool;
pub(crate) mod runner;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{ExecutionMode, MetricsSettings, SupervisorConfig};
pub use supervisor::Supervisor;
