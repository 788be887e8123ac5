//! Configuration: providers, per-worker property resolution and client settings.
//!
//! ```text
//! ConfigProvider (EnvProvider | MapProvider | custom)
//!        │
//!        ├── ConfigResolver::resolve(task_type, defaults) → WorkerSettings
//!        ├── ConfigResolver::is_paused(task_type, default)   (every poll cycle)
//!        └── ClientConfig::from_provider(..)                 (once, at client build)
//! ```

mod client;
mod provider;
mod worker;

pub use client::{auth_retry_from, ClientConfig, DEFAULT_SERVER_URL};
pub use provider::{ConfigProvider, EnvProvider, MapProvider};
pub use worker::{
    default_worker_id, parse_bool, parse_count, parse_millis, ConfigResolver, WorkerDefaults,
    WorkerProperty, WorkerSettings, GLOBAL_SCOPE, KEY_PREFIX,
};
