//! # Messaging Module
//!
//! Queue transport abstraction, the job wire format, broker topology and
//! the RabbitMQ and in-memory transports.

pub mod errors;
pub mod job;
pub mod management;
pub mod provider;
pub mod providers;
pub mod topology;
pub mod transport;

pub use errors::{ManagementError, RequeueError, TransportError};
pub use job::{Job, JobError, JobMeta};
pub use management::ManagementClient;
pub use provider::TransportProvider;
pub use providers::{BrokerTransport, MemoryTransport};
pub use topology::{ExchangeDefinition, ExchangeType, QueueBinding, QueueDefinition, Topology};
pub use transport::{
    DeliveryHandler, DeliveryMetadata, PushOptions, QueueInfo, QueueTransport, RequeueOptions,
    RequeueResult, RequeueStatus, TransportEvent,
};
