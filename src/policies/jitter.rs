//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that a fleet of workers
//! hitting the same failing server does not retry in lockstep.
//!
//! - [`JitterPolicy::None`]: exact delay
//! - [`JitterPolicy::Full`]: random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Proportional`]: `delay × (1 ± percent/100)`, symmetric

use rand::Rng;
use std::time::Duration;

/// Largest symmetric jitter accepted by [`JitterPolicy::Proportional`].
///
/// With doubling delays, `±33%` keeps consecutive delays non-decreasing.
pub const MAX_PROPORTIONAL_PERCENT: u8 = 33;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use exact backoff delay.
    #[default]
    None,

    /// Full jitter: random delay in `[0, delay]`.
    Full,

    /// Equal jitter: `delay/2 + random[0, delay/2]`.
    Equal,

    /// Symmetric jitter: uniform in `[delay × (1 − p), delay × (1 + p)]`.
    ///
    /// `percent` is clamped to [`MAX_PROPORTIONAL_PERCENT`].
    Proportional {
        /// Jitter width in percent of the delay.
        percent: u8,
    },
}

impl JitterPolicy {
    /// Symmetric jitter with the percentage clamped to the supported range.
    pub fn proportional(percent: u8) -> Self {
        JitterPolicy::Proportional {
            percent: percent.min(MAX_PROPORTIONAL_PERCENT),
        }
    }

    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
            JitterPolicy::Proportional { percent } => proportional_jitter(delay, *percent),
        }
    }

    /// Returns the `[low, high]` range this policy can produce for `delay`.
    pub fn bounds(&self, delay: Duration) -> (Duration, Duration) {
        match self {
            JitterPolicy::None => (delay, delay),
            JitterPolicy::Full => (Duration::ZERO, delay),
            JitterPolicy::Equal => (delay / 2, delay),
            JitterPolicy::Proportional { percent } => {
                let p = f64::from((*percent).min(MAX_PROPORTIONAL_PERCENT)) / 100.0;
                (delay.mul_f64(1.0 - p), delay.mul_f64(1.0 + p))
            }
        }
    }
}

/// Full jitter: random[0, delay]
fn full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

/// Equal jitter: delay/2 + random[0, delay/2]
fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}

fn proportional_jitter(delay: Duration, percent: u8) -> Duration {
    let p = f64::from(percent.min(MAX_PROPORTIONAL_PERCENT)) / 100.0;
    if p == 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - p)..=(1.0 + p));
    delay.mul_f64(factor)
}
