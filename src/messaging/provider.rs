//! # Transport Provider Enum
//!
//! Enum dispatch over the configured queue driver.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::errors::TransportError;
use super::providers::{BrokerTransport, MemoryTransport};
use super::transport::{
    DeliveryHandler, PushOptions, QueueInfo, QueueTransport, RequeueOptions, RequeueResult,
    TransportEvent,
};
use crate::config::{ConfigResult, QueueConfig};

/// Configured transport
///
/// # Variants
///
/// - `Broker` - RabbitMQ via lapin (`driver: amqp`)
/// - `Memory` - in-process queues (`driver: memory`)
#[derive(Debug)]
pub enum TransportProvider {
    Broker(BrokerTransport),
    Memory(MemoryTransport),
}

impl TransportProvider {
    pub fn from_config(config: &QueueConfig) -> ConfigResult<Self> {
        match config {
            QueueConfig::Amqp(amqp) => Ok(Self::Broker(BrokerTransport::new(amqp.clone())?)),
            QueueConfig::Memory => Ok(Self::Memory(MemoryTransport::new())),
        }
    }

    fn inner(&self) -> &dyn QueueTransport {
        match self {
            Self::Broker(t) => t,
            Self::Memory(t) => t,
        }
    }
}

#[async_trait]
impl QueueTransport for TransportProvider {
    async fn connect(&self) -> Result<(), TransportError> {
        match self {
            Self::Broker(t) => t.connect().await,
            Self::Memory(t) => t.connect().await,
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match self {
            Self::Broker(t) => t.disconnect().await,
            Self::Memory(t) => t.disconnect().await,
        }
    }

    async fn push(
        &self,
        routing_key: &str,
        message: &Value,
        options: &PushOptions,
    ) -> Result<(), TransportError> {
        match self {
            Self::Broker(t) => t.push(routing_key, message, options).await,
            Self::Memory(t) => t.push(routing_key, message, options).await,
        }
    }

    async fn consume(
        &self,
        queue_name: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError> {
        match self {
            Self::Broker(t) => t.consume(queue_name, handler).await,
            Self::Memory(t) => t.consume(queue_name, handler).await,
        }
    }

    async fn requeue(
        &self,
        source_queue: &str,
        options: RequeueOptions,
    ) -> Result<RequeueResult, TransportError> {
        match self {
            Self::Broker(t) => t.requeue(source_queue, options).await,
            Self::Memory(t) => t.requeue(source_queue, options).await,
        }
    }

    async fn get_queues_info(&self, queue_names: &[String]) -> Result<Vec<QueueInfo>, TransportError> {
        match self {
            Self::Broker(t) => t.get_queues_info(queue_names).await,
            Self::Memory(t) => t.get_queues_info(queue_names).await,
        }
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner().events()
    }

    fn provider_name(&self) -> &'static str {
        self.inner().provider_name()
    }
}
