//! # 401 re-authentication policy.
//!
//! When an auth-dependent endpoint answers `401`, the transport refreshes its token
//! and retries after `min(max_delay, base_delay × 2^attempt) ± jitter_percent`.
//! Once `max_attempts` is reached the [`AuthStopBehavior`] decides whether the
//! owning runner stops or keeps running without further 401 retries.

use std::str::FromStr;
use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// What happens when 401 retries are exhausted for an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthStopBehavior {
    /// Treat exhaustion as fatal for the owning runner.
    #[default]
    StopWorker,
    /// Keep running; further 401s fail immediately until a success resets the counter.
    Continue,
}

impl FromStr for AuthStopBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "stop" | "stop_worker" => Ok(AuthStopBehavior::StopWorker),
            "continue" => Ok(AuthStopBehavior::Continue),
            other => Err(format!("unknown auth stop behavior: {other}")),
        }
    }
}

/// Tuning for 401 handling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuthRetryPolicy {
    /// Retries allowed per endpoint before `stop_behavior` applies.
    pub max_attempts: u32,
    /// Delay for the first retry.
    pub base_delay: Duration,
    /// Cap for any single delay.
    pub max_delay: Duration,
    /// Symmetric jitter width (clamped to 33%).
    pub jitter_percent: u8,
    /// Behavior after exhaustion.
    pub stop_behavior: AuthStopBehavior,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_percent: 10,
            stop_behavior: AuthStopBehavior::StopWorker,
        }
    }
}

impl AuthRetryPolicy {
    /// The backoff this policy is expressed as.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(self.base_delay, self.max_delay)
            .with_jitter(JitterPolicy::proportional(self.jitter_percent))
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff().next(attempt)
    }

    /// True when another retry is allowed after `attempts` retries.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_follow_doubling_within_jitter() {
        let policy = AuthRetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter_percent: 10,
            stop_behavior: AuthStopBehavior::StopWorker,
        };
        for k in 0..3u32 {
            let base = 1000.0 * 2f64.powi(k as i32);
            let d = policy.delay(k).as_secs_f64() * 1000.0;
            assert!(d >= base * 0.9 - 1.0 && d <= base * 1.1 + 1.0, "k={k} d={d}");
        }
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn stop_behavior_parses() {
        assert_eq!("continue".parse(), Ok(AuthStopBehavior::Continue));
        assert_eq!("STOP-WORKER".parse(), Ok(AuthStopBehavior::StopWorker));
        assert!("halt".parse::<AuthStopBehavior>().is_err());
    }
}
