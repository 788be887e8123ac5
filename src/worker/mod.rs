//! User functions and how their results become task outcomes.
//!
//! ## Contents
//! - [`Worker`] a function bound to a task type, plus its code-level defaults
//! - [`Binding`], [`Param`], [`Args`] envelope vs. named-parameter call convention
//! - [`UserReturn`], [`normalize`] return-value shapes and the single path to a [`TaskOutcome`](crate::TaskOutcome)
//! - [`Invocation`] ready result or deferred future (async functions)

mod output;
mod params;
#[allow(clippy::module_inception)]
mod worker;

pub use output::{normalize, UserReturn, WorkerResult, RESULT_KEY, SERIALIZATION_ERROR_KEY};
pub use params::{Args, Binding, Param};
pub use worker::{BoxWorkerFuture, Invocation, Worker};
