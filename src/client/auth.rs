//! # Per-endpoint 401 retry bookkeeping.
//!
//! ```text
//! response on path P
//!   ├─ not 401  → reset(P)               (attempts = 0, exhausted = false)
//!   └─ 401      → on_unauthorized(P)
//!                   ├─ exhausted already          → Blocked   (fail fast, no refresh)
//!                   ├─ attempts < max_attempts    → Retry { delay }  (attempts += 1)
//!                   └─ attempts == max_attempts   → Exhausted        (stop behavior applies)
//! ```
//!
//! Delays never decrease for the same endpoint within one streak.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::policies::AuthRetryPolicy;

/// Token refresh endpoint; never subject to the 401 policy itself.
pub const TOKEN_PATH: &str = "token";

/// What the transport should do with a 401.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    /// Refresh the token, wait `delay`, resend.
    Retry { attempt: u32, delay: Duration },
    /// Retries just ran out.
    Exhausted { attempts: u32 },
    /// Retries ran out earlier and no success has reset the endpoint since.
    Blocked,
}

#[derive(Clone, Copy, Debug, Default)]
struct EndpointState {
    attempts: u32,
    last_delay: Duration,
    exhausted: bool,
}

/// 401 counters keyed by normalized request path.
#[derive(Debug)]
pub struct AuthRetryState {
    policy: AuthRetryPolicy,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl AuthRetryState {
    pub fn new(policy: AuthRetryPolicy) -> Self {
        Self {
            policy,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &AuthRetryPolicy {
        &self.policy
    }

    /// True when a 401 on `path` goes through the retry policy.
    pub fn applies_to(path: &str) -> bool {
        normalize_path(path) != TOKEN_PATH
    }

    /// Records a 401 on `path` and decides what happens next.
    pub fn on_unauthorized(&self, path: &str) -> AuthDecision {
        let key = normalize_path(path);
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        let state = endpoints.entry(key).or_default();

        if state.exhausted {
            return AuthDecision::Blocked;
        }
        if !self.policy.allows(state.attempts) {
            state.exhausted = true;
            return AuthDecision::Exhausted {
                attempts: state.attempts,
            };
        }

        let delay = self.policy.delay(state.attempts).max(state.last_delay);
        state.attempts += 1;
        state.last_delay = delay;
        AuthDecision::Retry {
            attempt: state.attempts,
            delay,
        }
    }

    /// Any non-401 response on `path` clears its counters.
    pub fn reset(&self, path: &str) {
        let key = normalize_path(path);
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.remove(&key);
    }

    /// Current attempt count for `path`.
    pub fn attempts(&self, path: &str) -> u32 {
        let key = normalize_path(path);
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.get(&key).map(|s| s.attempts).unwrap_or(0)
    }
}

/// Drops query and slashes, and folds id-like segments into `{id}`.
///
/// `/tasks/3f2b…-uuid/log?x=1` → `tasks/{id}/log`
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .map(|seg| {
            if seg.chars().all(|c| c.is_ascii_digit()) || uuid::Uuid::parse_str(seg).is_ok() {
                "{id}"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::AuthStopBehavior;

    fn policy(max: u32) -> AuthRetryPolicy {
        AuthRetryPolicy {
            max_attempts: max,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter_percent: 10,
            stop_behavior: AuthStopBehavior::StopWorker,
        }
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("/tasks/poll/batch/orders?count=2"), "tasks/poll/batch/orders");
        assert_eq!(
            normalize_path("tasks/6a1f3c2e-0b7d-4e8f-9a3b-2c1d0e9f8a7b/log/"),
            "tasks/{id}/log"
        );
        assert_eq!(normalize_path("workflow/42"), "workflow/{id}");
        assert!(!AuthRetryState::applies_to("/token"));
        assert!(AuthRetryState::applies_to("/tasks"));
    }

    #[test]
    fn delays_are_monotonic_and_bounded_then_exhaust() {
        let state = AuthRetryState::new(policy(3));
        let mut prev = Duration::ZERO;

        for k in 0..3u32 {
            match state.on_unauthorized("tasks") {
                AuthDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, k + 1);
                    let base = 1000.0 * 2f64.powi(k as i32);
                    let ms = delay.as_secs_f64() * 1000.0;
                    assert!(ms >= base * 0.9 - 1.0 && ms <= base * 1.1 + 1.0, "k={k} ms={ms}");
                    assert!(delay >= prev);
                    prev = delay;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            state.on_unauthorized("tasks"),
            AuthDecision::Exhausted { attempts: 3 }
        );
        assert_eq!(state.on_unauthorized("tasks"), AuthDecision::Blocked);
    }

    #[test]
    fn success_resets_only_that_endpoint() {
        let state = AuthRetryState::new(policy(3));
        state.on_unauthorized("tasks");
        state.on_unauthorized("tasks");
        state.on_unauthorized("tasks/poll/batch/orders");
        assert_eq!(state.attempts("tasks"), 2);

        state.reset("/tasks/");
        assert_eq!(state.attempts("tasks"), 0);
        assert_eq!(state.attempts("tasks/poll/batch/orders"), 1);
    }

    #[test]
    fn reset_unblocks_an_exhausted_endpoint() {
        let state = AuthRetryState::new(policy(1));
        assert!(matches!(state.on_unauthorized("tasks"), AuthDecision::Retry { .. }));
        assert!(matches!(state.on_unauthorized("tasks"), AuthDecision::Exhausted { .. }));
        state.reset("tasks");
        assert!(matches!(state.on_unauthorized("tasks"), AuthDecision::Retry { attempt: 1, .. }));
    }
}
