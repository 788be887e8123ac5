//! Background execution of async task functions.
//!
//! - [`BackgroundExecutor`] one scheduler thread shared by every worker
//! - [`ExecutionHandle`] result slot of non-blocking submissions

mod background;
mod handle;

pub use background::{BackgroundExecutor, ExecutorConfig};
pub use handle::ExecutionHandle;

use std::any::Any;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
