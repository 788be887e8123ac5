use std::sync::Arc;

use crate::client::{HttpTaskClient, TaskClient};
use crate::config::{ConfigProvider, ConfigResolver, EnvProvider};
use crate::core::config::SupervisorConfig;
use crate::core::supervisor::Supervisor;
use crate::error::RuntimeError;
use crate::events::Bus;
use crate::executor::BackgroundExecutor;
use crate::subscribers::{MetricsCollector, Subscribe};
use crate::worker::Worker;

/// Builder for a [`Supervisor`].
///
/// Everything except the configuration is optional:
/// - client: [`HttpTaskClient::from_env`]
/// - config provider: [`EnvProvider::new`]
/// - executor: the process-wide [`BackgroundExecutor::global`]
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    client: Option<Arc<dyn TaskClient>>,
    provider: Option<Arc<dyn ConfigProvider>>,
    executor: Option<BackgroundExecutor>,
    workers: Vec<Worker>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            client: None,
            provider: None,
            executor: None,
            workers: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Server transport shared by every runner.
    pub fn with_client(mut self, client: Arc<dyn TaskClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Source of `conductor.worker.*` overrides and the pause flag.
    pub fn with_config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Executor for async task functions. An injected executor is not shut down by the run.
    pub fn with_executor(mut self, executor: BackgroundExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_workers(mut self, workers: Vec<Worker>) -> Self {
        self.workers = workers;
        self
    }

    pub fn add_worker(mut self, worker: Worker) -> Self {
        self.workers.push(worker);
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor. Fails only when the default HTTP client cannot be built.
    ///
    /// Does not need a running tokio runtime; tasks are spawned by `run`.
    pub fn build(self) -> Result<Supervisor, RuntimeError> {
        let client = match self.client {
            Some(client) => client,
            None => Arc::new(HttpTaskClient::from_env()?),
        };
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(EnvProvider::new()));

        let mut subscribers = self.subscribers;
        let metrics = self.cfg.metrics.as_ref().map(|_| MetricsCollector::new());
        if let Some(m) = &metrics {
            subscribers.push(Arc::new(m.clone()));
        }

        Ok(Supervisor {
            bus: Bus::new(self.cfg.bus_capacity_clamped()),
            cfg: self.cfg,
            client,
            workers: self.workers,
            subscribers,
            resolver: ConfigResolver::new(provider),
            executor: self.executor,
            metrics,
        })
    }
}

impl Supervisor {
    /// Shorthand for [`SupervisorBuilder::new`].
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }
}
