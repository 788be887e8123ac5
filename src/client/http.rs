//! # HTTP transport against the Conductor REST API.
//!
//! One pooled `reqwest::Client` per [`HttpTaskClient`], shared by every runner.
//!
//! ```text
//! request(P)
//!   ├─ token()            cached token, refreshed when older than token_ttl
//!   ├─ send with X-Authorization
//!   ├─ status != 401      → auth.reset(P) → Ok(body) | Err(Status)
//!   └─ status == 401      → auth.on_unauthorized(P)
//!                             ├─ Retry{delay}  → refresh token, sleep(delay), resend
//!                             ├─ Exhausted     → Err(AuthExhausted{stop})
//!                             └─ Blocked       → Err(Unauthorized)
//! ```
//!
//! An empty or `204` body on poll means "no tasks".

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::client::auth::{AuthDecision, AuthRetryState, TOKEN_PATH};
use crate::client::{PollRequest, TaskClient};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::model::{TaskDef, TaskEnvelope, TaskOutcome};

/// Header carrying the access token.
pub const AUTH_HEADER: &str = "X-Authorization";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    key_id: &'a str,
    key_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Default)]
struct TokenCache {
    token: Option<String>,
    fetched_at: Option<Instant>,
}

/// [`TaskClient`] over HTTP.
pub struct HttpTaskClient {
    cfg: ClientConfig,
    http: reqwest::Client,
    auth: AuthRetryState,
    token: Mutex<TokenCache>,
}

impl HttpTaskClient {
    /// Builds the pooled client (proxy, TLS options and timeout from `cfg`).
    pub fn new(cfg: ClientConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().timeout(cfg.http_timeout);

        if let Some(proxy) = &cfg.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TransportError::Config(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        if !cfg.verify_ssl {
            warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(path) = &cfg.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                TransportError::Config(format!("cannot read CA certificate {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| TransportError::Config(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder.build()?;
        Ok(Self {
            auth: AuthRetryState::new(cfg.auth_retry),
            cfg,
            http,
            token: Mutex::new(TokenCache::default()),
        })
    }

    /// Client configured from the environment.
    pub fn from_env() -> Result<Self, TransportError> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    /// 401 bookkeeping (exposed for inspection).
    pub fn auth_state(&self) -> &AuthRetryState {
        &self.auth
    }

    /// Current token, fetching one when missing, stale, or `force`d.
    async fn token(&self, force: bool) -> Result<Option<String>, TransportError> {
        let (Some(key_id), Some(key_secret)) = (&self.cfg.key_id, &self.cfg.key_secret) else {
            return Ok(None);
        };

        let mut cache = self.token.lock().await;
        let fresh = cache
            .fetched_at
            .is_some_and(|t| t.elapsed() < self.cfg.token_ttl);
        if !force && fresh {
            if let Some(token) = &cache.token {
                return Ok(Some(token.clone()));
            }
        }

        let resp = self
            .http
            .post(self.cfg.url(TOKEN_PATH))
            .json(&TokenRequest {
                key_id,
                key_secret,
            })
            .send()
            .await?;
        match resp.status() {
            StatusCode::UNAUTHORIZED => {
                // The token endpoint never goes through the 401 policy.
                cache.token = None;
                return Err(TransportError::Unauthorized {
                    path: TOKEN_PATH.to_string(),
                });
            }
            s if !s.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(TransportError::Status {
                    code: s.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let TokenResponse { token } = resp.json().await?;
        debug!("access token refreshed");
        cache.token = Some(token.clone());
        cache.fetched_at = Some(Instant::now());
        Ok(Some(token))
    }

    /// Sends one request with token handling and the 401 policy; returns the body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<String, TransportError> {
        loop {
            let token = self.token(false).await?;
            let mut req = self.http.request(method.clone(), self.cfg.url(path)).query(query);
            if let Some(token) = &token {
                req = req.header(AUTH_HEADER, token);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = req.send().await?;
            let status = resp.status();

            if status != StatusCode::UNAUTHORIZED || !AuthRetryState::applies_to(path) {
                self.auth.reset(path);
                let text = resp.text().await?;
                if status.is_success() {
                    return Ok(text);
                }
                if status == StatusCode::UNAUTHORIZED {
                    return Err(TransportError::Unauthorized {
                        path: path.to_string(),
                    });
                }
                return Err(TransportError::Status {
                    code: status.as_u16(),
                    body: text,
                });
            }

            match self.auth.on_unauthorized(path) {
                AuthDecision::Retry { attempt, delay } => {
                    warn!(%path, attempt, ?delay, "401 received; refreshing token and retrying");
                    if let Err(e) = self.token(true).await {
                        warn!(%path, error = %e, "token refresh failed");
                    }
                    tokio::time::sleep(delay).await;
                }
                AuthDecision::Exhausted { attempts } => {
                    let stop = self.auth.policy().stop_behavior;
                    error!(%path, attempts, ?stop, "401 retries exhausted");
                    return Err(TransportError::AuthExhausted {
                        path: path.to_string(),
                        attempts,
                        stop,
                    });
                }
                AuthDecision::Blocked => {
                    return Err(TransportError::Unauthorized {
                        path: path.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl TaskClient for HttpTaskClient {
    async fn batch_poll(&self, req: &PollRequest) -> Result<Vec<TaskEnvelope>, TransportError> {
        let path = format!("tasks/poll/batch/{}", req.task_type);
        let mut query = vec![
            ("workerid", req.worker_id.clone()),
            ("count", req.count.to_string()),
            ("timeout", req.timeout.as_millis().to_string()),
        ];
        if let Some(domain) = &req.domain {
            query.push(("domain", domain.clone()));
        }

        let body = self.request(Method::GET, &path, &query, None).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let tasks: Option<Vec<TaskEnvelope>> =
            serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(tasks.unwrap_or_default())
    }

    async fn update_task(&self, outcome: &TaskOutcome) -> Result<(), TransportError> {
        let body = serde_json::to_value(outcome).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.request(Method::POST, "tasks", &[], Some(&body)).await?;
        Ok(())
    }

    async fn register_task_defs(&self, defs: &[TaskDef]) -> Result<(), TransportError> {
        let body = serde_json::to_value(defs).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.request(Method::POST, "metadata/taskdefs", &[], Some(&body))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpTaskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskClient")
            .field("server_url", &self.cfg.server_url)
            .field("authenticated", &self.cfg.has_credentials())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ca_file_is_a_config_error() {
        let mut cfg = ClientConfig::new("http://localhost:1/api");
        cfg.ca_cert = Some("/definitely/not/here.pem".into());
        assert!(matches!(
            HttpTaskClient::new(cfg),
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn anonymous_client_sends_no_token() {
        let client = HttpTaskClient::new(ClientConfig::new("http://localhost:1/api")).unwrap();
        assert_eq!(client.token(false).await.unwrap(), None);
    }
}
