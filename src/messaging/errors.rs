//! # Messaging Error Types
//!
//! Structured errors for the queue transports and the broker management API.

use thiserror::Error;

/// Errors raised by a queue transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Connection canceled")]
    ConnectionCancelled,

    #[error("Transport is not connected, cannot {operation}")]
    NotConnected { operation: String },

    #[error("Topology provisioning failed for {object}: {message}")]
    Topology { object: String, message: String },

    #[error("Publish to exchange '{exchange}' with routing key '{routing_key}' failed: {message}")]
    Publish {
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Incorrect payload, invalid JSON: {message}")]
    Decode { message: String },

    #[error("Consume error on queue {queue_name}: {message}")]
    Consume { queue_name: String, message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error(transparent)]
    Management(#[from] ManagementError),

    #[error(transparent)]
    Requeue(#[from] RequeueError),
}

impl TransportError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn not_connected(operation: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
        }
    }

    pub fn topology(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Topology {
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn publish(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn consume(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<lapin::Error> for TransportError {
    fn from(err: lapin::Error) -> Self {
        Self::connection(err.to_string())
    }
}

/// Errors from the broker management HTTP API
#[derive(Error, Debug)]
pub enum ManagementError {
    #[error("Management API authentication failed: {message}")]
    Authentication { message: String },

    #[error("Management API unreachable: {message}")]
    Network { message: String },

    #[error("Invalid management API URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Management API returned {status} for {endpoint}: {body}")]
    UnexpectedResponse {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("RabbitMQ Shovel plugin not available. Ensure the rabbitmq_shovel and rabbitmq_shovel_management plugins are enabled.")]
    ShovelUnavailable,
}

impl ManagementError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ManagementError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

/// Errors specific to dead-letter requeue
#[derive(Error, Debug)]
pub enum RequeueError {
    #[error("A requeue from {source_queue} is already in progress")]
    InProgress { source_queue: String },

    #[error("Destination queue {queue} does not exist")]
    DestinationNotFound { queue: String },

    #[error("Source queue {queue} does not exist")]
    SourceNotFound { queue: String },

    #[error("Requeue count must be at least 1, got {count}")]
    InvalidCount { count: u64 },

    #[error(transparent)]
    Management(#[from] ManagementError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shovel_unavailable_message_names_plugins() {
        let message = ManagementError::ShovelUnavailable.to_string();
        assert!(message.contains("rabbitmq_shovel"));
        assert!(message.contains("rabbitmq_shovel_management"));
    }

    #[test]
    fn test_requeue_error_converts_into_transport_error() {
        let err: TransportError = RequeueError::InProgress {
            source_queue: "dead".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            TransportError::Requeue(RequeueError::InProgress { .. })
        ));
        assert_eq!(err.to_string(), "A requeue from dead is already in progress");
    }
}
