//! Transport implementations

pub mod memory;
pub mod rabbitmq;

pub use memory::MemoryTransport;
pub use rabbitmq::BrokerTransport;
