//! # Application Context
//!
//! Dependency container shared by producers, consumers and the CLI: the
//! loaded configuration, the metrics registry, the queue transport and the
//! job module registry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ArnavonConfig, ConfigManager};
use crate::error::Result;
use crate::jobs::{JobDispatcher, JobModuleRegistry, RunnerFactory};
use crate::messaging::{QueueTransport, TransportProvider};
use crate::metrics::MetricsRegistry;

#[derive(Clone)]
pub struct AppContext {
    /// Instance id, useful to tell processes apart in logs
    pub context_id: Uuid,
    config: Arc<ArnavonConfig>,
    metrics: Arc<MetricsRegistry>,
    transport: Arc<dyn QueueTransport>,
    modules: Arc<JobModuleRegistry>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("context_id", &self.context_id)
            .field("transport", &self.transport.provider_name())
            .field("jobs", &self.config.jobs.len())
            .field("modules", &self.modules)
            .finish()
    }
}

impl AppContext {
    /// Build the context with the transport named by the configuration
    pub fn from_config(config: ArnavonConfig) -> Result<Self> {
        let transport = TransportProvider::from_config(&config.queue)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn from_manager(manager: Arc<ConfigManager>) -> Result<Self> {
        Self::from_config(manager.into_config())
    }

    /// Build the context around an existing transport
    pub fn with_transport(config: ArnavonConfig, transport: Arc<dyn QueueTransport>) -> Result<Self> {
        let context = Self {
            context_id: Uuid::new_v4(),
            config: Arc::new(config),
            metrics: Arc::new(MetricsRegistry::new()?),
            transport,
            modules: Arc::new(JobModuleRegistry::new()),
        };
        info!(
            context_id = %context.context_id,
            transport = context.transport.provider_name(),
            jobs = context.config.jobs.len(),
            "Application context ready"
        );
        Ok(context)
    }

    /// Share a module registry populated by the caller
    pub fn with_modules(mut self, modules: Arc<JobModuleRegistry>) -> Self {
        self.modules = modules;
        self
    }

    pub fn config(&self) -> &Arc<ArnavonConfig> {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn transport(&self) -> &Arc<dyn QueueTransport> {
        &self.transport
    }

    pub fn modules(&self) -> &Arc<JobModuleRegistry> {
        &self.modules
    }

    /// Dispatcher for every configured job
    pub fn dispatcher(&self) -> Result<JobDispatcher> {
        Ok(JobDispatcher::from_config(
            &self.config.jobs,
            self.transport.clone(),
            self.metrics.clone(),
        )?)
    }

    /// Factory resolving paths against the configuration directory
    pub fn runner_factory(&self) -> RunnerFactory {
        RunnerFactory::new(self.modules.clone(), self.config.cwd.clone())
    }

    /// Connect, run `work`, then disconnect whatever the outcome
    pub async fn with_transport_connected<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn QueueTransport>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.transport.connect().await?;
        let outcome = work(self.transport.clone()).await;
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Disconnect after command failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use serde_json::json;

    fn job(name: &str) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            input_schema: json!({"type": "object"}),
            invalid_job_exchange: None,
        }
    }

    #[test]
    fn test_context_from_memory_config() {
        let context = AppContext::from_config(ArnavonConfig::in_memory(vec![job("send-email")])).unwrap();
        assert_eq!(context.transport().provider_name(), "memory");
        let dispatcher = context.dispatcher().unwrap();
        assert_eq!(dispatcher.job_names(), vec!["send-email"]);
    }

    #[test]
    fn test_duplicate_jobs_rejected() {
        let context =
            AppContext::from_config(ArnavonConfig::in_memory(vec![job("a"), job("a")])).unwrap();
        assert!(context.dispatcher().is_err());
    }

    #[tokio::test]
    async fn test_with_transport_connected_runs_work() {
        let context = AppContext::from_config(ArnavonConfig::in_memory(vec![])).unwrap();
        let names = context
            .with_transport_connected(|transport| async move {
                Ok(transport.get_queues_info(&["a".to_string()]).await?)
            })
            .await
            .unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "a");
    }
}
