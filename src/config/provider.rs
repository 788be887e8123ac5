//! # Configuration providers.
//!
//! A [`ConfigProvider`] answers "what is the current value of this key?". The
//! resolver asks again on every pause check, so a provider doubles as a
//! restart-free control plane: change the value and running runners pick it up
//! within one poll cycle.
//!
//! - [`EnvProvider`] reads the process environment.
//! - [`MapProvider`] is an in-memory, mutable map (tests, embedded control planes).

use std::collections::HashMap;
use std::sync::RwLock;

/// Source of raw configuration values.
pub trait ConfigProvider: Send + Sync + 'static {
    /// Returns the raw value for `key`, or `None` when unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Process-environment provider.
///
/// A dotted key such as `conductor.worker.orders.paused` is looked up verbatim
/// first, then as `CONDUCTOR_WORKER_ORDERS_PAUSED`. Empty values count as unset.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvProvider;

impl EnvProvider {
    pub fn new() -> Self {
        Self
    }

    /// Loads a `.env` file (if any) into the process environment first.
    pub fn with_dotenv() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!(error = %err, "no .env file loaded");
        }
        Self
    }

    /// Upper-snake form of a dotted key.
    pub fn env_key(key: &str) -> String {
        key.chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl ConfigProvider for EnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                std::env::var(Self::env_key(key))
                    .ok()
                    .filter(|v| !v.trim().is_empty())
            })
    }
}

/// In-memory provider; values can be changed while runners are live.
#[derive(Debug, Default)]
pub struct MapProvider {
    values: RwLock<HashMap<String, String>>,
}

impl MapProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) a value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.into(), value.into());
    }

    /// Removes a value.
    pub fn remove(&self, key: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            values: RwLock::new(values),
        }
    }
}

impl ConfigProvider for MapProvider {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn env_key_is_upper_snake() {
        assert_eq!(
            EnvProvider::env_key("conductor.worker.order-sync.poll_interval"),
            "CONDUCTOR_WORKER_ORDER_SYNC_POLL_INTERVAL"
        );
        assert_eq!(
            EnvProvider::env_key("conductor.worker.all.poll_interval"),
            "CONDUCTOR_WORKER_ALL_POLL_INTERVAL"
        );
        assert_eq!(
            EnvProvider::env_key("conductor.worker.slow_report.paused"),
            "CONDUCTOR_WORKER_SLOW_REPORT_PAUSED"
        );
    }

    #[test]
    #[serial]
    fn env_provider_falls_back_to_upper_snake() {
        std::env::set_var("CONDUCTOR_WORKER_ENVTEST_PAUSED", "yes");
        let provider = EnvProvider::new();
        assert_eq!(
            provider.get("conductor.worker.envtest.paused").as_deref(),
            Some("yes")
        );
        std::env::remove_var("CONDUCTOR_WORKER_ENVTEST_PAUSED");
        assert_eq!(provider.get("conductor.worker.envtest.paused"), None);
    }

    #[test]
    fn map_provider_is_mutable_and_ignores_blank() {
        let provider: MapProvider = [("a", "1")].into_iter().collect();
        assert_eq!(provider.get("a").as_deref(), Some("1"));
        provider.set("a", "  ");
        assert_eq!(provider.get("a"), None);
        provider.set("b", "2");
        provider.remove("b");
        assert_eq!(provider.get("b"), None);
    }
}
