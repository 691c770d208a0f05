//! # Job Error Types
//!
//! Errors raised by the dispatcher and by job runners.

use serde_json::{json, Value};
use thiserror::Error;

use super::result::JobResult;
use super::validator::{ValidationCause, ValidationError};
use crate::messaging::{Job, JobError, TransportError};

/// Dispatch failures
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown job `{job_name}`")]
    UnknownJob { job_name: String },

    #[error("{message}")]
    DataValidation {
        message: String,
        root_causes: Vec<ValidationCause>,
    },

    /// Some batch elements failed validation
    ///
    /// In best-effort mode `published` holds the jobs that were still pushed.
    #[error("{message}")]
    InvalidBatch {
        message: String,
        valids: Vec<Value>,
        invalids: Vec<Value>,
        published: Vec<Job>,
    },

    #[error(transparent)]
    InvalidJob(#[from] JobError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    pub fn unknown_job(job_name: impl Into<String>) -> Self {
        Self::UnknownJob {
            job_name: job_name.into(),
        }
    }

    pub fn data_validation(message: impl Into<String>) -> Self {
        Self::DataValidation {
            message: message.into(),
            root_causes: Vec::new(),
        }
    }

    /// Payload rejection, including batches with invalid elements
    pub fn is_data_validation(&self) -> bool {
        matches!(self, Self::DataValidation { .. } | Self::InvalidBatch { .. })
    }

    /// JSON body describing the failure for a caller at a service boundary
    pub fn to_json(&self) -> Value {
        match self {
            Self::InvalidBatch {
                message,
                valids,
                invalids,
                ..
            } => json!({
                "error": message,
                "valids": valids,
                "invalids": invalids,
            }),
            Self::DataValidation {
                message,
                root_causes,
            } => json!({
                "error": message,
                "rootCauses": root_causes,
            }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        Self::DataValidation {
            message: err.to_string(),
            root_causes: err.root_causes,
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(TransportError::from(err))
    }
}

/// Runner failures
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The runner broke its contract, e.g. returned synchronously
    #[error("InvalidRunError: {message}")]
    InvalidRun { message: String },

    /// The job ran and reported failure
    #[error("{}", .0.error.as_deref().unwrap_or("Job failed"))]
    Failed(JobResult),

    #[error(transparent)]
    InvalidJob(#[from] JobError),

    #[error("Command not found or not executable: {command}")]
    CommandNotFound { command: String },

    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("Failed to write job to process stdin: {message}")]
    Stdin { message: String },

    #[error("Process I/O error: {message}")]
    Io { message: String },

    #[error("Unable to load module {path} (searched from {cwd})")]
    ModuleLoad { path: String, cwd: String },

    #[error("Module error: {message}")]
    Module { message: String },
}

impl RunnerError {
    pub fn invalid_run(message: impl Into<String>) -> Self {
        Self::InvalidRun {
            message: message.into(),
        }
    }

    pub fn spawn(command: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Spawn {
            command: command.into(),
            message: err.to_string(),
        }
    }

    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }

    pub fn is_invalid_run(&self) -> bool {
        matches!(self, Self::InvalidRun { .. })
    }

    /// The job result carried by a reported failure
    pub fn job_result(&self) -> Option<&JobResult> {
        match self {
            Self::Failed(result) => Some(result),
            _ => None,
        }
    }
}
