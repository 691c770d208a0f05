//! # Job Runner
//!
//! A runner turns a dequeued message into work. Implementations only provide
//! [`JobRunner::invoke`]; the provided [`JobRunner::run`] adds mode handling,
//! contract checks, logging and metrics.
//!
//! ## Modes
//!
//! - **wrapped**: the message is a job envelope; the runner receives the
//!   [`Job`] stamped with its dequeue time, and run metrics are recorded
//! - **raw**: the message is passed through untouched and no metrics are kept

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use super::dispatcher::JobDispatcher;
use super::errors::RunnerError;
use super::result::JobResult;
use super::runners::{ModuleRunnerConfig, ProcessRunnerConfig};
use crate::messaging::job::json_kind;
use crate::messaging::{DeliveryMetadata, Job};
use crate::metrics::MetricsRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    #[serde(alias = "arnavon")]
    Wrapped,
    Raw,
}

/// Runner section of a consumer configuration
///
/// ```yaml
/// runner:
///   type: process
///   mode: wrapped
///   path: ./bin/send-email
///   args: ["--verbose"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(flatten)]
    pub kind: RunnerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunnerKind {
    #[serde(alias = "binary")]
    Process(ProcessRunnerConfig),
    #[serde(alias = "nodejs")]
    Module(ModuleRunnerConfig),
}

/// What a runner receives
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunInput {
    Job(Job),
    Raw(Value),
}

impl RunInput {
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Job(job) => Some(job),
            Self::Raw(_) => None,
        }
    }

    /// The value handed to the work itself: the payload or the raw message
    pub fn payload(&self) -> &Value {
        match self {
            Self::Job(job) => job.payload(),
            Self::Raw(value) => value,
        }
    }
}

/// Context passed along with every run
#[derive(Clone)]
pub struct RunnerContext {
    pub delivery: Option<DeliveryMetadata>,
    pub dispatcher: Option<Arc<JobDispatcher>>,
    pub metrics: Arc<MetricsRegistry>,
}

impl fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerContext")
            .field("delivery", &self.delivery)
            .field("dispatcher", &self.dispatcher.is_some())
            .finish()
    }
}

impl RunnerContext {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            delivery: None,
            dispatcher: None,
            metrics,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryMetadata) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }
}

pub type RunFuture = Pin<Box<dyn Future<Output = Result<JobResult, RunnerError>> + Send>>;

/// What an implementation hands back from `invoke`
pub enum RunInvocation {
    /// Work that completes asynchronously
    Deferred(RunFuture),
    /// A synchronous return; rejected as a contract violation
    Immediate(Value),
}

impl fmt::Debug for RunInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
        }
    }
}

impl RunInvocation {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<JobResult, RunnerError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }
}

#[async_trait]
pub trait JobRunner: Send + Sync + fmt::Debug {
    /// Implementation name used in logs
    fn name(&self) -> &'static str;

    fn mode(&self) -> RunMode;

    /// Start the work for `input`
    fn invoke(&self, input: RunInput, context: RunnerContext) -> Result<RunInvocation, RunnerError>;

    /// Run a dequeued message according to the runner's mode
    async fn run(&self, message: Value, context: RunnerContext) -> Result<JobResult, RunnerError> {
        match self.mode() {
            RunMode::Wrapped => run_wrapped(self, message, context).await,
            RunMode::Raw => settle(self, RunInput::Raw(message), context).await,
        }
    }
}

async fn run_wrapped<R>(
    runner: &R,
    message: Value,
    context: RunnerContext,
) -> Result<JobResult, RunnerError>
where
    R: JobRunner + ?Sized,
{
    let job = Job::from_wire(message)?;
    let dequeued = context
        .delivery
        .as_ref()
        .map_or_else(Utc::now, |d| d.dequeued_at);
    let job = job.with_dequeued(dequeued);
    let job_name = job.job_name().unwrap_or("unknown").to_string();
    let dispatched = job.meta().dispatched;
    let metrics = context.metrics.clone();

    let outcome = settle(runner, RunInput::Job(job), context).await;
    metrics
        .runner()
        .observe_run(&job_name, outcome.is_ok(), dispatched, dequeued);
    outcome
}

async fn settle<R>(
    runner: &R,
    input: RunInput,
    context: RunnerContext,
) -> Result<JobResult, RunnerError>
where
    R: JobRunner + ?Sized,
{
    info!(runner = runner.name(), "Running runner implementation");

    let invocation = match runner.invoke(input, context) {
        Ok(invocation) => invocation,
        Err(err) => {
            error!(runner = runner.name(), error = %err, "Runner failed synchronously");
            return Err(err);
        }
    };

    match invocation {
        RunInvocation::Immediate(value) => {
            let err = RunnerError::invalid_run(format!(
                "The {} runner didn't return an asynchronous result. Got {}",
                runner.name(),
                json_kind(&value)
            ));
            error!(runner = runner.name(), error = %err, "Runner contract violated");
            Err(err)
        }
        RunInvocation::Deferred(future) => match future.await {
            Ok(result) if result.success => {
                info!(runner = runner.name(), "Runner implementation succeeded");
                Ok(result)
            }
            Ok(result) => {
                error!(runner = runner.name(), error = ?result.error, "Runner implementation failed");
                Err(RunnerError::Failed(result))
            }
            Err(err) => {
                error!(runner = runner.name(), error = %err, "Runner implementation failed");
                Err(err)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::JobMeta;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoRunner {
        mode: RunMode,
    }

    impl JobRunner for EchoRunner {
        fn name(&self) -> &'static str {
            "EchoRunner"
        }

        fn mode(&self) -> RunMode {
            self.mode
        }

        fn invoke(&self, input: RunInput, _context: RunnerContext) -> Result<RunInvocation, RunnerError> {
            let payload = input.payload().clone();
            Ok(RunInvocation::deferred(async move { Ok(JobResult::success(payload)) }))
        }
    }

    fn context() -> RunnerContext {
        RunnerContext::new(Arc::new(MetricsRegistry::new().unwrap()))
    }

    #[test]
    fn test_mode_aliases() {
        let mode: RunMode = serde_yaml::from_str("arnavon").unwrap();
        assert_eq!(mode, RunMode::Wrapped);
        let raw: RunMode = serde_yaml::from_str("raw").unwrap();
        assert_eq!(raw, RunMode::Raw);
    }

    #[test]
    fn test_runner_config_aliases() {
        let config: RunnerConfig =
            serde_yaml::from_str("type: binary\npath: /bin/cat\n").unwrap();
        assert_eq!(config.mode, RunMode::Wrapped);
        assert!(matches!(config.kind, RunnerKind::Process(ref p) if p.path == "/bin/cat"));

        let module: RunnerConfig =
            serde_yaml::from_str("type: nodejs\nmode: raw\nmodule: jobs/echo\n").unwrap();
        assert_eq!(module.mode, RunMode::Raw);
        assert!(matches!(module.kind, RunnerKind::Module(_)));
    }

    #[tokio::test]
    async fn test_wrapped_run_hands_payload_and_records_metrics() {
        let runner = EchoRunner {
            mode: RunMode::Wrapped,
        };
        let ctx = context();
        let metrics = ctx.metrics.clone();
        let job = Job::new(json!({"to": "a@b.c"}), JobMeta::new().job_name("send-email"));

        let result = runner.run(job.to_value().unwrap(), ctx).await.unwrap();
        assert_eq!(result.result, json!({"to": "a@b.c"}));
        assert_eq!(metrics.runner().success_count("send-email"), 1);
        assert_eq!(metrics.runner().lead_time_samples("send-email", true), 0);
    }

    #[tokio::test]
    async fn test_raw_run_passes_message_untouched() {
        let runner = EchoRunner { mode: RunMode::Raw };
        let ctx = context();
        let metrics = ctx.metrics.clone();

        let result = runner.run(json!([1, 2, 3]), ctx).await.unwrap();
        assert_eq!(result.result, json!([1, 2, 3]));
        assert_eq!(metrics.runner().success_count("unknown"), 0);
    }
}
