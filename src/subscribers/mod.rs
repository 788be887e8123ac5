//! # Event subscribers for the worker runtime.
//!
//! Runners and the supervisor publish [`Event`](crate::events::Event)s on the
//! [`Bus`](crate::events::Bus); the supervisor forwards them to a
//! [`SubscriberSet`], which feeds each [`Subscribe`] implementation through its
//! own bounded queue.
//!
//! ```text
//! Runner ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                                 │
//!                                                    ┌────────────┼───────────┐
//!                                                    ▼            ▼           ▼
//!                                                LogWriter  MetricsCollector Custom
//! ```

#[cfg(feature = "logging")]
mod log;
mod metrics;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use self::metrics::MetricsCollector;
#[cfg(test)]
pub(crate) use self::metrics::sample;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
