//! # Hierarchical worker settings.
//!
//! Each property resolves independently, in increasing priority:
//! ```text
//! code default  <  conductor.worker.all.<property>  <  conductor.worker.<taskType>.<property>
//! ```
//! Unparseable values fall back silently to the next-lower layer.
//!
//! `paused` is re-resolved on every poll cycle. A global pause cannot be lifted by
//! a task-specific `false`; a task-specific flag only adds a pause.

use std::sync::Arc;
use std::time::Duration;

use crate::config::provider::ConfigProvider;

/// Scope name for fleet-wide overrides.
pub const GLOBAL_SCOPE: &str = "all";

/// Key prefix shared by all worker properties.
pub const KEY_PREFIX: &str = "conductor.worker";

/// Worker property names, as they appear in configuration keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerProperty {
    PollInterval,
    Domain,
    WorkerId,
    ThreadCount,
    RegisterTaskDef,
    PollTimeout,
    LeaseExtendEnabled,
    Paused,
}

impl WorkerProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerProperty::PollInterval => "poll_interval",
            WorkerProperty::Domain => "domain",
            WorkerProperty::WorkerId => "worker_id",
            WorkerProperty::ThreadCount => "thread_count",
            WorkerProperty::RegisterTaskDef => "register_task_def",
            WorkerProperty::PollTimeout => "poll_timeout",
            WorkerProperty::LeaseExtendEnabled => "lease_extend_enabled",
            WorkerProperty::Paused => "paused",
        }
    }

    /// Full key for `scope` (`"all"` or a task type).
    pub fn key(&self, scope: &str) -> String {
        format!("{KEY_PREFIX}.{scope}.{}", self.as_str())
    }
}

/// Code-level defaults for one worker (the lowest-priority layer).
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerDefaults {
    pub poll_interval: Duration,
    pub domain: Option<String>,
    /// `None` → host name (see [`default_worker_id`]).
    pub worker_id: Option<String>,
    pub thread_count: usize,
    pub register_task_def: bool,
    pub poll_timeout: Duration,
    pub lease_extend_enabled: bool,
    pub paused: bool,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            domain: None,
            worker_id: None,
            thread_count: 1,
            register_task_def: false,
            poll_timeout: Duration::from_millis(100),
            lease_extend_enabled: false,
            paused: false,
        }
    }
}

/// Effective settings for one task type.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub domain: Option<String>,
    pub worker_id: String,
    /// Concurrency limit (always `>= 1`).
    pub thread_count: usize,
    pub register_task_def: bool,
    pub poll_timeout: Duration,
    pub lease_extend_enabled: bool,
    pub paused: bool,
}

/// Resolves [`WorkerSettings`] against a [`ConfigProvider`].
#[derive(Clone)]
pub struct ConfigResolver {
    provider: Arc<dyn ConfigProvider>,
}

impl ConfigResolver {
    pub fn new(provider: Arc<dyn ConfigProvider>) -> Self {
        Self { provider }
    }

    /// Full resolution for `task_type`.
    pub fn resolve(&self, task_type: &str, defaults: &WorkerDefaults) -> WorkerSettings {
        use WorkerProperty as P;

        WorkerSettings {
            poll_interval: self
                .lookup(task_type, P::PollInterval, parse_millis)
                .unwrap_or(defaults.poll_interval),
            domain: self
                .lookup(task_type, P::Domain, parse_text)
                .or_else(|| defaults.domain.clone()),
            worker_id: self
                .lookup(task_type, P::WorkerId, parse_text)
                .or_else(|| defaults.worker_id.clone())
                .unwrap_or_else(default_worker_id),
            thread_count: self
                .lookup(task_type, P::ThreadCount, parse_count)
                .unwrap_or(defaults.thread_count)
                .max(1),
            register_task_def: self
                .lookup(task_type, P::RegisterTaskDef, parse_bool)
                .unwrap_or(defaults.register_task_def),
            poll_timeout: self
                .lookup(task_type, P::PollTimeout, parse_millis)
                .unwrap_or(defaults.poll_timeout),
            lease_extend_enabled: self
                .lookup(task_type, P::LeaseExtendEnabled, parse_bool)
                .unwrap_or(defaults.lease_extend_enabled),
            paused: self.is_paused(task_type, defaults.paused),
        }
    }

    /// Current pause state for `task_type`.
    pub fn is_paused(&self, task_type: &str, default: bool) -> bool {
        let global = self.scoped(GLOBAL_SCOPE, WorkerProperty::Paused, parse_bool);
        if global == Some(true) {
            return true;
        }
        self.lookup(task_type, WorkerProperty::Paused, parse_bool)
            .unwrap_or(default)
    }

    /// Task-specific value if it parses, else global value if it parses.
    fn lookup<T>(
        &self,
        task_type: &str,
        property: WorkerProperty,
        parse: fn(&str) -> Option<T>,
    ) -> Option<T> {
        self.scoped(task_type, property, parse)
            .or_else(|| self.scoped(GLOBAL_SCOPE, property, parse))
    }

    fn scoped<T>(
        &self,
        scope: &str,
        property: WorkerProperty,
        parse: fn(&str) -> Option<T>,
    ) -> Option<T> {
        let key = property.key(scope);
        let raw = self.provider.get(&key)?;
        let parsed = parse(&raw);
        if parsed.is_none() {
            tracing::debug!(%key, value = %raw, "ignoring unparseable worker setting");
        }
        parsed
    }
}

/// Case-insensitive `true/1/yes/on` and `false/0/no/off`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Whole milliseconds.
pub fn parse_millis(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_millis)
}

/// Positive integer.
pub fn parse_count(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

fn parse_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Host name from the environment, else a random `worker-<uuid>`.
pub fn default_worker_id() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()))
}
