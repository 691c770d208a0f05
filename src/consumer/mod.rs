//! # Consumer
//!
//! Binds queues to runners and keeps them fed. Start order is fixed:
//! connect the transport, supervise its events, open the status endpoint,
//! then subscribe every binding. Losing the transport is fatal for the
//! process; the broker redelivers unacknowledged work after a restart.

pub mod status;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::constants::consumer::FATAL_EXIT_CODE;
use crate::context::AppContext;
use crate::error::Result;
use crate::jobs::{
    DispatchError, JobDispatcher, JobRunner, RunMode, RunnerConfig, RunnerContext, RunnerFactory,
};
use crate::messaging::{DeliveryHandler, DeliveryMetadata, Job, QueueTransport, TransportEvent};
use crate::metrics::MetricsRegistry;

pub use status::{create_router, StatusServer};

/// A queue and the runner that works it
#[derive(Debug, Clone)]
pub struct ConsumerBinding {
    pub name: String,
    pub queue: String,
    pub runner: RunnerConfig,
}

impl ConsumerBinding {
    pub fn new(name: impl Into<String>, queue: impl Into<String>, runner: RunnerConfig) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            runner,
        }
    }

    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self::new(&config.name, &config.queue, config.runner.clone())
    }
}

/// Called once with the first transport event
pub type FatalHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

fn exit_process() -> FatalHandler {
    Arc::new(|event| {
        error!(%event, exit_code = FATAL_EXIT_CODE, "Transport lost, exiting");
        std::process::exit(FATAL_EXIT_CODE);
    })
}

/// Hands each delivery of one binding to its runner
struct BindingHandler {
    binding: String,
    runner: Arc<dyn JobRunner>,
    dispatcher: Option<Arc<JobDispatcher>>,
    metrics: Arc<MetricsRegistry>,
}

impl BindingHandler {
    /// Re-validate a wrapped job's payload with the dispatcher's validator
    ///
    /// A job the dispatcher does not know, or one without a name, is refused.
    fn dress(&self, message: Value) -> anyhow::Result<Value> {
        let Some(dispatcher) = &self.dispatcher else {
            return Ok(message);
        };
        if self.runner.mode() != RunMode::Wrapped {
            return Ok(message);
        }
        let job = Job::from_wire(message)?;
        let job_name = job.job_name().unwrap_or_default();
        let Some(validator) = dispatcher.validator_for(job_name) else {
            warn!(binding = %self.binding, job_name, "Delivery for unknown job refused");
            return Err(DispatchError::unknown_job(job_name).into());
        };
        let (meta, payload) = job.into_parts();
        let payload = validator.validate(&payload)?;
        Ok(Job::new(payload, meta).to_value()?)
    }
}

#[async_trait]
impl DeliveryHandler for BindingHandler {
    async fn handle(&self, message: Value, delivery: DeliveryMetadata) -> anyhow::Result<()> {
        debug!(
            binding = %self.binding,
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            "Delivery received"
        );
        let message = self.dress(message)?;

        let mut context = RunnerContext::new(self.metrics.clone()).with_delivery(delivery);
        if let Some(dispatcher) = &self.dispatcher {
            context = context.with_dispatcher(dispatcher.clone());
        }

        self.runner.run(message, context).await?;
        Ok(())
    }
}

#[derive(Default)]
struct RunningState {
    supervisor: Option<JoinHandle<()>>,
    status: Option<StatusServer>,
}

pub struct Consumer {
    bindings: Vec<(ConsumerBinding, Arc<dyn JobRunner>)>,
    dispatcher: Option<Arc<JobDispatcher>>,
    context: AppContext,
    fatal_handler: FatalHandler,
    status_port: u16,
    state: Mutex<RunningState>,
    status_addr: parking_lot::RwLock<Option<SocketAddr>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field(
                "bindings",
                &self.bindings.iter().map(|(b, _)| &b.queue).collect::<Vec<_>>(),
            )
            .field("status_port", &self.status_port)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

impl Consumer {
    /// Build the runners of every binding; a missing command or module fails here
    pub fn new(
        bindings: Vec<ConsumerBinding>,
        dispatcher: Option<Arc<JobDispatcher>>,
        context: AppContext,
    ) -> Result<Self> {
        let factory = context.runner_factory();
        Self::with_factory(bindings, dispatcher, context, &factory)
    }

    pub fn with_factory(
        bindings: Vec<ConsumerBinding>,
        dispatcher: Option<Arc<JobDispatcher>>,
        context: AppContext,
        factory: &RunnerFactory,
    ) -> Result<Self> {
        let bindings = bindings
            .into_iter()
            .map(|binding| -> Result<_> {
                let runner = factory.create(&binding.runner)?;
                Ok((binding, runner))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bindings,
            dispatcher,
            status_port: context.config().status.port,
            context,
            fatal_handler: exit_process(),
            state: Mutex::new(RunningState::default()),
            status_addr: parking_lot::RwLock::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Consumer for every configured binding, with a dispatcher for every job
    pub fn from_context(context: AppContext) -> Result<Self> {
        let bindings = context
            .config()
            .consumers
            .iter()
            .map(ConsumerBinding::from_config)
            .collect();
        let dispatcher = Arc::new(context.dispatcher()?);
        Self::new(bindings, Some(dispatcher), context)
    }

    pub fn with_fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.fatal_handler = handler;
        self
    }

    pub fn with_status_port(mut self, port: u16) -> Self {
        self.status_port = port;
        self
    }

    /// Address of the status endpoint once started
    pub fn status_addr(&self) -> Option<SocketAddr> {
        *self.status_addr.read()
    }

    fn transport(&self) -> &Arc<dyn QueueTransport> {
        self.context.transport()
    }

    /// Connect, supervise, serve status, then consume every binding
    ///
    /// A failed start is rolled back and may be retried.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.started.load(Ordering::SeqCst) {
            warn!("Consumer already started");
            return Ok(());
        }

        if let Err(e) = self.start_components(&mut state).await {
            self.roll_back(&mut state).await;
            return Err(e);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_components(&self, state: &mut RunningState) -> Result<()> {
        // Subscribe first so nothing emitted during connect is missed
        let events = self.transport().events();
        self.transport().connect().await?;
        state.supervisor = Some(spawn_supervisor(events, self.fatal_handler.clone()));

        let status = StatusServer::bind(self.status_port, self.context.metrics().clone()).await?;
        *self.status_addr.write() = Some(status.local_addr());
        state.status = Some(status);

        for (binding, runner) in &self.bindings {
            info!(
                consumer = %binding.name,
                queue = %binding.queue,
                runner = runner.name(),
                mode = ?runner.mode(),
                "Starting consumer"
            );
            let handler = Arc::new(BindingHandler {
                binding: binding.name.clone(),
                runner: runner.clone(),
                dispatcher: self.dispatcher.clone(),
                metrics: self.context.metrics().clone(),
            });
            self.transport().consume(&binding.queue, handler).await?;
        }

        Ok(())
    }

    async fn roll_back(&self, state: &mut RunningState) {
        if let Some(supervisor) = state.supervisor.take() {
            supervisor.abort();
        }
        if let Some(mut status) = state.status.take() {
            status.shutdown().await;
        }
        *self.status_addr.write() = None;
        if let Err(e) = self.transport().disconnect().await {
            warn!(error = %e, "Disconnect after failed start failed");
        }
    }

    /// Close the status endpoint and disconnect; later calls do nothing
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping consumer");
        let mut state = self.state.lock().await;

        if let Some(mut status) = state.status.take() {
            status.shutdown().await;
        }
        // Disconnect events are suppressed by the transport; the supervisor is not needed anymore
        if let Some(supervisor) = state.supervisor.take() {
            supervisor.abort();
        }
        self.transport().disconnect().await?;
        Ok(())
    }

    /// Start, wait for `shutdown`, then stop
    pub async fn run_until_shutdown<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            error!(error = %e, "Consumer failed to start");
            self.stop().await?;
            return Err(e);
        }
        shutdown.await;
        self.stop().await
    }
}

fn spawn_supervisor(
    mut events: broadcast::Receiver<TransportEvent>,
    fatal_handler: FatalHandler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let event = loop {
            match events.recv().await {
                Ok(event) => break event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Transport events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Transport event channel closed");
                    return;
                }
            }
        };
        error!(%event, "Transport failure, consumption cannot continue");
        fatal_handler(event);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArnavonConfig;
    use crate::jobs::{module_fn, ModuleRunnerConfig, RunnerKind};
    use crate::messaging::MemoryTransport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fatal_handler_called_on_transport_event() {
        let transport = Arc::new(MemoryTransport::new());
        let context =
            AppContext::with_transport(ArnavonConfig::in_memory(vec![]), transport.clone()).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let consumer = Consumer::new(vec![], None, context)
            .unwrap()
            .with_status_port(0)
            .with_fatal_handler(Arc::new(move |event| {
                let _ = tx.send(event);
            }));

        consumer.start().await.unwrap();
        assert!(consumer.status_addr().is_some());
        transport.simulate_event(TransportEvent::Closed("connection reset".to_string()));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TransportEvent::Closed("connection reset".to_string()));

        consumer.stop().await.unwrap();
        consumer.stop().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried() {
        let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let transport = Arc::new(MemoryTransport::new());
        let context =
            AppContext::with_transport(ArnavonConfig::in_memory(vec![]), transport.clone()).unwrap();
        let consumer = Consumer::new(vec![], None, context)
            .unwrap()
            .with_status_port(port);

        assert!(consumer.start().await.is_err());
        assert!(consumer.status_addr().is_none());
        assert!(!transport.is_connected());

        drop(blocker);
        consumer.start().await.unwrap();
        assert_eq!(consumer.status_addr().map(|addr| addr.port()), Some(port));
        assert!(transport.is_connected());
        consumer.stop().await.unwrap();
    }

    #[test]
    fn test_unknown_module_fails_construction() {
        let context = AppContext::from_config(ArnavonConfig::in_memory(vec![])).unwrap();
        let binding = ConsumerBinding::new(
            "mailer",
            "send-email",
            RunnerConfig {
                mode: RunMode::Raw,
                kind: RunnerKind::Module(ModuleRunnerConfig::new("jobs/missing")),
            },
        );
        assert!(Consumer::new(vec![binding], None, context).is_err());
    }

    #[test]
    fn test_registered_module_builds() {
        let context = AppContext::from_config(ArnavonConfig::in_memory(vec![])).unwrap();
        context.modules().register(
            "jobs/echo",
            module_fn(|input, _ctx| async move { Ok::<_, anyhow::Error>(input.payload().clone()) }),
        );
        let binding = ConsumerBinding::new(
            "echo",
            "echo",
            RunnerConfig {
                mode: RunMode::Raw,
                kind: RunnerKind::Module(ModuleRunnerConfig::new("jobs/echo")),
            },
        );
        assert!(Consumer::new(vec![binding], None, context).is_ok());
    }
}
