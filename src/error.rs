//! Crate-level error aggregating the per-module errors

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::jobs::{DispatchError, RunnerError};
use crate::messaging::TransportError;

#[derive(Error, Debug)]
pub enum ArnavonError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Status endpoint error: {0}")]
    Status(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArnavonError>;
