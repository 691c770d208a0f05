#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Arnavon Core
//!
//! Job queue framework: producers dispatch schema-validated jobs to a queue,
//! consumers pull them and hand them to runners.
//!
//! ## Module Organization
//!
//! - [`config`] - YAML configuration, loading and validation
//! - [`messaging`] - job envelope, transport trait, RabbitMQ and in-memory transports,
//!   topology provisioning, management API requeue
//! - [`jobs`] - validators, dispatcher, runner contract, process and module runners
//! - [`consumer`] - queue bindings, transport supervision, status endpoint
//! - [`metrics`] - prometheus counters and histograms
//! - [`logging`] - tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arnavon_core::config::{ArnavonConfig, JobConfig};
//! use arnavon_core::context::AppContext;
//! use arnavon_core::jobs::DispatchMeta;
//! use arnavon_core::messaging::PushOptions;
//! use serde_json::json;
//!
//! # async fn example() -> arnavon_core::Result<()> {
//! let config = ArnavonConfig::in_memory(vec![JobConfig {
//!     name: "send-email".to_string(),
//!     input_schema: json!({"type": "object", "required": ["to"]}),
//!     invalid_job_exchange: None,
//! }]);
//! let context = AppContext::from_config(config)?;
//! context.transport().connect().await?;
//!
//! let dispatcher = context.dispatcher()?;
//! let job = dispatcher
//!     .dispatch("send-email", json!({"to": "ops@example.com"}), DispatchMeta::new(), PushOptions::new())
//!     .await?;
//! println!("dispatched {}", job.id());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod consumer;
pub mod context;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod messaging;
pub mod metrics;

pub use config::{ArnavonConfig, ConfigManager, ConfigurationError};
pub use consumer::{Consumer, ConsumerBinding};
pub use context::AppContext;
pub use error::{ArnavonError, Result};
pub use jobs::{DispatchError, JobDispatcher, JobResult, JobRunner, RunnerError};
pub use messaging::{Job, QueueTransport, TransportError, TransportProvider};
pub use metrics::MetricsRegistry;
