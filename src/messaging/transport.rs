//! # Queue Transport
//!
//! Provider-agnostic contract for pushing JSON messages to a broker and
//! consuming them back with acknowledgement.
//!
//! Implementations: [`BrokerTransport`](super::providers::BrokerTransport)
//! (AMQP) and [`MemoryTransport`](super::providers::MemoryTransport).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use super::errors::{RequeueError, TransportError};
use crate::constants::headers::RESERVED_PREFIX;

/// Core transport trait
///
/// Every method may be called concurrently from several tasks.
#[async_trait]
pub trait QueueTransport: Send + Sync + fmt::Debug + 'static {
    /// Establish the connection and provision topology
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection; subsequent connection loss is not reported
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Publish a message under `routing_key`
    ///
    /// Resolves only once the broker has confirmed the message.
    async fn push(
        &self,
        routing_key: &str,
        message: &Value,
        options: &PushOptions,
    ) -> Result<(), TransportError>;

    /// Start consuming `queue_name`
    ///
    /// Each decoded message is handed to `handler`; success acknowledges the
    /// delivery, failure rejects it without requeue (dead-lettering it).
    async fn consume(
        &self,
        queue_name: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError>;

    /// Move messages from `source_queue` back to a work queue
    async fn requeue(
        &self,
        source_queue: &str,
        options: RequeueOptions,
    ) -> Result<RequeueResult, TransportError>;

    /// Message and consumer counts for the named queues
    async fn get_queues_info(&self, queue_names: &[String])
        -> Result<Vec<QueueInfo>, TransportError>;

    /// Subscribe to asynchronous connection events
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Provider name for logging and diagnostics
    fn provider_name(&self) -> &'static str;
}

/// Callback invoked for each consumed message
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, message: Value, delivery: DeliveryMetadata) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> DeliveryHandler for F
where
    F: Fn(Value, DeliveryMetadata) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: Value, delivery: DeliveryMetadata) -> anyhow::Result<()> {
        (self)(message, delivery).await
    }
}

/// Delivery information passed alongside each consumed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMetadata {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub dequeued_at: DateTime<Utc>,
}

/// Publish options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOptions {
    /// Overrides the default exchange
    pub exchange: Option<String>,
    pub headers: Map<String, Value>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Headers to forward to the broker, without the reserved ones
    pub fn broker_headers(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.headers.iter().filter(|(key, _)| {
            let reserved = key.starts_with(RESERVED_PREFIX);
            if reserved {
                debug!(header = %key, "Dropping reserved header");
            }
            !reserved
        })
    }
}

/// Requeue request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueOptions {
    pub destination_queue: String,
    /// `None` moves every message present when the requeue starts
    #[serde(default)]
    pub count: Option<u64>,
}

impl RequeueOptions {
    pub fn to(destination_queue: impl Into<String>) -> Self {
        Self {
            destination_queue: destination_queue.into(),
            count: None,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn validate(&self) -> Result<(), RequeueError> {
        match self.count {
            Some(0) => Err(RequeueError::InvalidCount { count: 0 }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequeueStatus {
    /// Transfer started and finishes in the background
    Initiated,
    /// Transfer finished before returning
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueFailure {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueResult {
    pub status: RequeueStatus,
    pub requeued: u64,
    pub failed: u64,
    #[serde(default)]
    pub errors: Vec<RequeueFailure>,
}

impl RequeueResult {
    pub fn completed(requeued: u64) -> Self {
        Self {
            status: RequeueStatus::Completed,
            requeued,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn initiated(requeued: u64) -> Self {
        Self {
            status: RequeueStatus::Initiated,
            ..Self::completed(requeued)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub messages: u64,
    pub consumers: u64,
    pub state: String,
}

impl QueueInfo {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: 0,
            consumers: 0,
            state: "not_found".to_string(),
        }
    }
}

/// Asynchronous transport events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Error(String),
    Closed(String),
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "transport error: {message}"),
            Self::Closed(message) => write!(f, "transport closed: {message}"),
        }
    }
}

/// Broadcast fan-out for [`TransportEvent`]s
#[derive(Debug, Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<TransportEvent>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.sender.subscribe()
    }

    /// Emit an event; having no subscriber is not an error
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a delivery body as JSON
pub fn decode_message(body: &[u8]) -> Result<Value, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_headers_are_not_forwarded() {
        let options = PushOptions::new()
            .with_header("x-arnavon-trace", json!("abc"))
            .with_header("x-tenant", json!("acme"));

        let forwarded: Vec<_> = options.broker_headers().map(|(k, _)| k.as_str()).collect();
        assert_eq!(forwarded, vec!["x-tenant"]);
    }

    #[test]
    fn test_requeue_count_must_be_positive() {
        assert!(RequeueOptions::to("work").with_count(0).validate().is_err());
        assert!(RequeueOptions::to("work").with_count(1).validate().is_ok());
        assert!(RequeueOptions::to("work").validate().is_ok());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        assert!(matches!(
            decode_message(b"{not json"),
            Err(TransportError::Decode { .. })
        ));
        assert_eq!(decode_message(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_requeue_status_serializes_lowercase() {
        let result = RequeueResult::initiated(3);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "initiated");
        assert_eq!(value["requeued"], 3);
    }
}
