//! Retry, backoff and re-authentication policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`] randomization strategy to avoid thundering herd
//! - [`UpdateRetryPolicy`] bounded retries when reporting an outcome
//! - [`AuthRetryPolicy`], [`AuthStopBehavior`] 401 refresh-and-retry tuning
//!
//! ## Quick wiring
//! ```text
//! TaskRunner
//!   ├─ poll failure #n      → wait max(poll_interval, poll_backoff.next(n-1))
//!   └─ update failure #n    → sleep(update_retry.backoff.next(n-1)), give up after attempts
//! HttpTaskClient
//!   └─ 401 on endpoint #k   → refresh token, sleep(auth.delay(k)), retry until max_attempts
//! ```

mod auth;
mod backoff;
mod jitter;
mod retry;

pub use auth::{AuthRetryPolicy, AuthStopBehavior};
pub use backoff::BackoffPolicy;
pub use jitter::{JitterPolicy, MAX_PROPORTIONAL_PERCENT};
pub use retry::UpdateRetryPolicy;
