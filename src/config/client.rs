//! # Client connection settings.
//!
//! | Key | Default |
//! |-----|---------|
//! | `CONDUCTOR_SERVER_URL` | `http://localhost:8080/api` |
//! | `CONDUCTOR_AUTH_KEY` / `CONDUCTOR_AUTH_SECRET` | none (anonymous) |
//! | `CONDUCTOR_PROXY` | none |
//! | `CONDUCTOR_VERIFY_SSL` | `true` |
//! | `CONDUCTOR_SSL_CA_CERT` | none |
//! | `CONDUCTOR_HTTP_TIMEOUT_MS` | `30000` |
//! | `CONDUCTOR_AUTH_TOKEN_TTL_MIN` | `45` |
//! | `CONDUCTOR_AUTH_401_MAX_ATTEMPTS` | `5` |
//! | `CONDUCTOR_AUTH_401_BASE_DELAY_MS` | `1000` |
//! | `CONDUCTOR_AUTH_401_MAX_DELAY_MS` | `60000` |
//! | `CONDUCTOR_AUTH_401_JITTER_PERCENT` | `10` (clamped to 33) |
//! | `CONDUCTOR_AUTH_401_STOP_BEHAVIOR` | `stop_worker` |

use std::path::PathBuf;
use std::time::Duration;

use crate::config::provider::{ConfigProvider, EnvProvider};
use crate::config::worker::{parse_bool, parse_millis};
use crate::policies::{AuthRetryPolicy, AuthStopBehavior, MAX_PROPORTIONAL_PERCENT};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080/api";

/// Connection and credential settings for [`HttpTaskClient`](crate::HttpTaskClient).
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Base URL including the API prefix, without trailing slash.
    pub server_url: String,
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub proxy: Option<String>,
    pub verify_ssl: bool,
    pub ca_cert: Option<PathBuf>,
    /// Per-request timeout.
    pub http_timeout: Duration,
    /// How long a fetched token is reused before a proactive refresh.
    pub token_ttl: Duration,
    pub auth_retry: AuthRetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            key_id: None,
            key_secret: None,
            proxy: None,
            verify_ssl: true,
            ca_cert: None,
            http_timeout: Duration::from_secs(30),
            token_ttl: Duration::from_secs(45 * 60),
            auth_retry: AuthRetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: normalize_url(server_url.into()),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self.key_secret = Some(secret.into());
        self
    }

    pub fn with_auth_retry(mut self, policy: AuthRetryPolicy) -> Self {
        self.auth_retry = policy;
        self
    }

    /// Reads every setting from the process environment (and `.env`).
    pub fn from_env() -> Self {
        Self::from_provider(&EnvProvider::with_dotenv())
    }

    /// Reads every setting from `provider`; unset or unparseable keys keep defaults.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        let d = Self::default();
        Self {
            server_url: provider
                .get("CONDUCTOR_SERVER_URL")
                .map(normalize_url)
                .unwrap_or(d.server_url),
            key_id: provider.get("CONDUCTOR_AUTH_KEY"),
            key_secret: provider.get("CONDUCTOR_AUTH_SECRET"),
            proxy: provider.get("CONDUCTOR_PROXY"),
            verify_ssl: provider
                .get("CONDUCTOR_VERIFY_SSL")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(d.verify_ssl),
            ca_cert: provider.get("CONDUCTOR_SSL_CA_CERT").map(PathBuf::from),
            http_timeout: provider
                .get("CONDUCTOR_HTTP_TIMEOUT_MS")
                .and_then(|v| parse_millis(&v))
                .unwrap_or(d.http_timeout),
            token_ttl: provider
                .get("CONDUCTOR_AUTH_TOKEN_TTL_MIN")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(d.token_ttl),
            auth_retry: auth_retry_from(provider),
        }
    }

    /// True when both key id and secret are set.
    pub fn has_credentials(&self) -> bool {
        self.key_id.is_some() && self.key_secret.is_some()
    }

    /// `server_url` joined with a relative API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.server_url, path.trim_start_matches('/'))
    }
}

fn normalize_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

impl AuthRetryPolicy {
    /// Reads the `CONDUCTOR_AUTH_401_*` family from the process environment.
    pub fn from_env() -> Self {
        auth_retry_from(&EnvProvider::new())
    }
}

/// Reads the `CONDUCTOR_AUTH_401_*` family.
pub fn auth_retry_from(provider: &dyn ConfigProvider) -> AuthRetryPolicy {
    let d = AuthRetryPolicy::default();
    let num = |key: &str| provider.get(key).and_then(|v| v.trim().parse::<u64>().ok());

    AuthRetryPolicy {
        max_attempts: num("CONDUCTOR_AUTH_401_MAX_ATTEMPTS")
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(d.max_attempts),
        base_delay: num("CONDUCTOR_AUTH_401_BASE_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(d.base_delay),
        max_delay: num("CONDUCTOR_AUTH_401_MAX_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(d.max_delay),
        jitter_percent: num("CONDUCTOR_AUTH_401_JITTER_PERCENT")
            .map(|p| p.min(MAX_PROPORTIONAL_PERCENT as u64) as u8)
            .unwrap_or(d.jitter_percent),
        stop_behavior: provider
            .get("CONDUCTOR_AUTH_401_STOP_BEHAVIOR")
            .and_then(|v| v.parse::<AuthStopBehavior>().ok())
            .unwrap_or(d.stop_behavior),
    }
}
