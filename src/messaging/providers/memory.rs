//! # In-Memory Transport
//!
//! Deterministic in-process transport for tests and local development.
//!
//! ## Behaviour
//!
//! - **Push** appends `{key, message}` to the queue named by the exchange
//!   override, or by the routing key when there is none
//! - **Consume** drains the queue, awaiting each handler call before the next
//! - **Requeue** moves entries between queues synchronously, in FIFO order

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::messaging::errors::TransportError;
use crate::messaging::transport::{
    decode_message, DeliveryHandler, DeliveryMetadata, EventChannel, PushOptions, QueueInfo,
    QueueTransport, RequeueOptions, RequeueResult, TransportEvent,
};

/// A queued entry: routing key plus the encoded body
#[derive(Debug, Clone)]
struct MemoryEntry {
    key: String,
    body: Vec<u8>,
    headers: Map<String, Value>,
}

#[derive(Debug, Default)]
struct MemoryCounters {
    pushed: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    delivery_tag: AtomicU64,
}

/// In-memory queue transport
///
/// ```rust
/// use arnavon_core::messaging::{MemoryTransport, PushOptions, QueueTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = MemoryTransport::new();
/// transport.push("send-email", &serde_json::json!({"to": "a@b.c"}), &PushOptions::new()).await?;
/// assert_eq!(transport.queue_length("send-email").await, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryTransport {
    queues: RwLock<HashMap<String, VecDeque<MemoryEntry>>>,
    counters: MemoryCounters,
    events: EventChannel,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn queue_length(&self, queue_name: &str) -> usize {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map_or(0, VecDeque::len)
    }

    /// Routing keys of the queued entries, in order
    pub async fn queue_keys(&self, queue_name: &str) -> Vec<String> {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map(|q| q.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Decoded messages currently queued, without removing them
    pub async fn peek_messages(&self, queue_name: &str) -> Vec<Value> {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map(|q| {
                q.iter()
                    .filter_map(|e| serde_json::from_slice(&e.body).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Headers of the queued entries, in order
    pub async fn queue_headers(&self, queue_name: &str) -> Vec<Map<String, Value>> {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map(|q| q.iter().map(|e| e.headers.clone()).collect())
            .unwrap_or_default()
    }

    /// Enqueue raw bytes, bypassing serialization
    pub async fn push_raw(&self, queue_name: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.enqueue(
            queue_name,
            MemoryEntry {
                key: key.to_string(),
                body: body.into(),
                headers: Map::new(),
            },
        )
        .await;
    }

    /// Emit a transport event as if the connection had failed
    pub fn simulate_event(&self, event: TransportEvent) {
        self.events.emit(event);
    }

    pub fn pushed_count(&self) -> u64 {
        self.counters.pushed.load(Ordering::SeqCst)
    }

    pub fn acked_count(&self) -> u64 {
        self.counters.acked.load(Ordering::SeqCst)
    }

    pub fn rejected_count(&self) -> u64 {
        self.counters.rejected.load(Ordering::SeqCst)
    }

    async fn enqueue(&self, queue_name: &str, entry: MemoryEntry) {
        self.queues
            .write()
            .await
            .entry(queue_name.to_string())
            .or_default()
            .push_back(entry);
        self.counters.pushed.fetch_add(1, Ordering::SeqCst);
    }

    async fn next_entry(&self, queue_name: &str) -> Option<MemoryEntry> {
        self.queues
            .write()
            .await
            .get_mut(queue_name)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl QueueTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn push(
        &self,
        routing_key: &str,
        message: &Value,
        options: &PushOptions,
    ) -> Result<(), TransportError> {
        let queue_name = options.exchange.as_deref().unwrap_or(routing_key);
        let body = serde_json::to_vec(message)?;
        let headers = options
            .broker_headers()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.enqueue(
            queue_name,
            MemoryEntry {
                key: routing_key.to_string(),
                body,
                headers,
            },
        )
        .await;
        debug!(queue = queue_name, routing_key, "Message queued in memory");
        Ok(())
    }

    async fn consume(
        &self,
        queue_name: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), TransportError> {
        while let Some(entry) = self.next_entry(queue_name).await {
            let message = match decode_message(&entry.body) {
                Ok(message) => message,
                Err(err) => {
                    warn!(queue = queue_name, error = %err, "Rejecting undecodable message");
                    self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            };

            let delivery = DeliveryMetadata {
                queue: queue_name.to_string(),
                exchange: String::new(),
                routing_key: entry.key.clone(),
                delivery_tag: self.counters.delivery_tag.fetch_add(1, Ordering::SeqCst) + 1,
                redelivered: false,
                dequeued_at: Utc::now(),
            };

            match handler.handle(message, delivery).await {
                Ok(()) => {
                    self.counters.acked.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    warn!(queue = queue_name, error = %err, "Handler failed, message rejected");
                    self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    async fn requeue(
        &self,
        source_queue: &str,
        options: RequeueOptions,
    ) -> Result<RequeueResult, TransportError> {
        options.validate()?;

        let mut queues = self.queues.write().await;
        let moved: Vec<MemoryEntry> = match queues.get_mut(source_queue) {
            Some(source) => {
                let take = options
                    .count
                    .map_or(source.len(), |count| (count as usize).min(source.len()));
                source.drain(..take).collect()
            }
            None => Vec::new(),
        };
        let requeued = moved.len() as u64;
        queues
            .entry(options.destination_queue.clone())
            .or_default()
            .extend(moved);

        debug!(
            source = source_queue,
            destination = %options.destination_queue,
            requeued,
            "Requeued in memory"
        );
        Ok(RequeueResult::completed(requeued))
    }

    async fn get_queues_info(&self, queue_names: &[String]) -> Result<Vec<QueueInfo>, TransportError> {
        let queues = self.queues.read().await;
        Ok(queue_names
            .iter()
            .map(|name| QueueInfo {
                name: name.clone(),
                messages: queues.get(name).map_or(0, VecDeque::len) as u64,
                consumers: 0,
                state: "running".to_string(),
            })
            .collect())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
