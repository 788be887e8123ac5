//! Wire data model shared by the transport, the worker wrapper and the runner.
//!
//! ## Contents
//! - [`TaskEnvelope`] what a poll returns
//! - [`TaskOutcome`], [`TaskStatus`], [`TaskExecLog`] what an update sends
//! - [`TaskInProgress`] the "call me back later" marker user code may return
//! - [`TaskDef`] minimal definition used for auto-registration

mod outcome;
mod task;
mod taskdef;

pub use outcome::{TaskExecLog, TaskInProgress, TaskOutcome, TaskStatus, MIN_CALLBACK_AFTER};
pub use task::TaskEnvelope;
pub use taskdef::TaskDef;
