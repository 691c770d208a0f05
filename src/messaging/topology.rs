//! # Broker Topology
//!
//! Declarative exchanges, queues and bindings. Provisioning runs in three
//! stages (exchanges, then queues, then bindings); declarations inside a
//! stage run concurrently. Every declaration is idempotent on the broker, so
//! provisioning may be repeated on each connect.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::TransportError;
use crate::config::error::{ConfigResult, ConfigurationError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Topic,
    Direct,
    #[default]
    Fanout,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Headers => "headers",
        }
    }
}

fn durable_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ExchangeType,
    /// Exactly one exchange is the publish default
    #[serde(rename = "default", default)]
    pub is_default: bool,
    #[serde(default = "durable_default")]
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBinding {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    #[serde(default = "durable_default")]
    pub durable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_routing_key: Option<String>,
    #[serde(default)]
    pub bindings: Vec<QueueBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub exchanges: Vec<ExchangeDefinition>,
    #[serde(default)]
    pub queues: Vec<QueueDefinition>,
}

/// Broker-side declaration primitives
#[async_trait]
pub trait TopologyDeclarer: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeDefinition) -> Result<(), TransportError>;

    async fn declare_queue(&self, queue: &QueueDefinition) -> Result<(), TransportError>;

    async fn bind_queue(&self, queue: &str, binding: &QueueBinding) -> Result<(), TransportError>;
}

impl Topology {
    /// The exchange flagged as default
    pub fn default_exchange(&self) -> ConfigResult<&ExchangeDefinition> {
        let defaults: Vec<_> = self.exchanges.iter().filter(|e| e.is_default).collect();
        match defaults.as_slice() {
            [single] => Ok(single),
            [] => Err(ConfigurationError::MissingDefaultExchange),
            many => Err(ConfigurationError::MultipleDefaultExchanges { count: many.len() }),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.default_exchange()?;

        for queue in &self.queues {
            if queue.name.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "name",
                    "topology queue",
                ));
            }
            for binding in &queue.bindings {
                if !self.exchanges.iter().any(|e| e.name == binding.exchange) {
                    return Err(ConfigurationError::invalid_value(
                        "bindings.exchange",
                        binding.exchange.clone(),
                        format!("queue '{}' binds to an undeclared exchange", queue.name),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }

    /// Declare everything in stage order
    pub async fn provision<D>(&self, declarer: &D) -> Result<(), TransportError>
    where
        D: TopologyDeclarer + ?Sized,
    {
        try_join_all(self.exchanges.iter().map(|e| declarer.declare_exchange(e))).await?;
        debug!(count = self.exchanges.len(), "Exchanges declared");

        try_join_all(self.queues.iter().map(|q| declarer.declare_queue(q))).await?;
        debug!(count = self.queues.len(), "Queues declared");

        let bindings = self
            .queues
            .iter()
            .flat_map(|q| q.bindings.iter().map(move |b| (q.name.as_str(), b)));
        try_join_all(bindings.map(|(queue, binding)| declarer.bind_queue(queue, binding))).await?;
        debug!("Bindings declared");

        Ok(())
    }
}
