//! Handle to work running off the caller's stack.

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::AbortHandle;

use crate::error::ExecutorError;

/// Result slot of a submitted execution.
///
/// The result can be taken once: by [`try_take`](Self::try_take) from a polling
/// loop, or by awaiting [`wait`](Self::wait).
pub struct ExecutionHandle<T> {
    rx: oneshot::Receiver<Result<T, ExecutorError>>,
    abort: Option<AbortHandle>,
}

impl<T> ExecutionHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, ExecutorError>>, abort: AbortHandle) -> Self {
        Self {
            rx,
            abort: Some(abort),
        }
    }

    /// Handle for work on a thread that cannot be aborted.
    pub(crate) fn detached(rx: oneshot::Receiver<Result<T, ExecutorError>>) -> Self {
        Self { rx, abort: None }
    }

    /// Returns the result if it is ready; `None` while still running.
    ///
    /// A task that went away without producing a result reads as [`ExecutorError::Cancelled`].
    pub fn try_take(&mut self) -> Option<Result<T, ExecutorError>> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(ExecutorError::Cancelled)),
        }
    }

    /// Requests cancellation; the result then reads as `Cancelled`.
    ///
    /// Detached work keeps running and its result is discarded with the handle.
    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    /// Waits for the result.
    pub async fn wait(self) -> Result<T, ExecutorError> {
        self.rx.await.unwrap_or(Err(ExecutorError::Cancelled))
    }
}

impl<T> std::fmt::Debug for ExecutionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("abortable", &self.abort.is_some())
            .finish()
    }
}
