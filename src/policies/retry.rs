//! Bounded retry policy for reporting task outcomes.

use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// How often, and how patiently, the runner retries a failed update.
///
/// After `attempts` failures the outcome is dropped; the server's own task timeout
/// re-queues the task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateRetryPolicy {
    /// Total attempts including the first one (minimum 1).
    pub attempts: u32,
    /// Delay between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for UpdateRetryPolicy {
    /// Four attempts, 1s → 2s → 4s with equal jitter.
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(10),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
        }
    }
}

impl UpdateRetryPolicy {
    /// Attempts, never less than one.
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}
