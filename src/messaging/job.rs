//! # Job
//!
//! The unit of work carried through the queue: a validated payload plus
//! metadata. Serialized on the wire as `{"meta": {...}, "payload": ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while constructing or decoding a job
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    #[error("Invalid ID: uuid expected, got {value}")]
    InvalidId { value: String },

    #[error("Invalid meta: object expected, got {kind}")]
    InvalidMeta { kind: String },

    #[error("Malformed job: {reason}")]
    Malformed { reason: String },
}

/// Job metadata
///
/// Caller-supplied keys that are not part of the known set are kept in
/// `extra` and travel with the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMeta {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dequeued: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobMeta {
    /// Fresh metadata with a generated id
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: None,
            dispatched: None,
            dequeued: None,
            batch_id: None,
            extra: Map::new(),
        }
    }

    /// Metadata with an explicit id, which must be a valid UUID
    pub fn with_id(id: &str) -> Result<Self, JobError> {
        let id = Uuid::parse_str(id).map_err(|_| JobError::InvalidId {
            value: id.to_string(),
        })?;
        Ok(Self {
            id,
            ..Self::new()
        })
    }

    /// Build metadata from an arbitrary JSON value
    ///
    /// `null` yields fresh metadata. A supplied `id` must be a UUID string.
    pub fn from_value(value: Value) -> Result<Self, JobError> {
        let mut map = match value {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(JobError::InvalidMeta {
                    kind: json_kind(&other).to_string(),
                })
            }
        };

        let id = match map.remove("id") {
            None | Some(Value::Null) => Uuid::new_v4(),
            Some(Value::String(s)) => {
                Uuid::parse_str(&s).map_err(|_| JobError::InvalidId { value: s.clone() })?
            }
            Some(other) => {
                return Err(JobError::InvalidId {
                    value: other.to_string(),
                })
            }
        };

        let mut meta: JobMeta = serde_json::from_value(Value::Object(map)).map_err(|e| {
            JobError::Malformed {
                reason: e.to_string(),
            }
        })?;
        meta.id = id;
        Ok(meta)
    }

    pub fn job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    pub fn dispatched_at(mut self, at: DateTime<Utc>) -> Self {
        self.dispatched = Some(at);
        self
    }

    pub fn batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

impl Default for JobMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable job value
///
/// Fields are private; the only "mutation" is [`Job::with_dequeued`], which
/// returns a new job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    meta: JobMeta,
    payload: Value,
}

impl Job {
    pub fn new(payload: Value, meta: JobMeta) -> Self {
        Self { meta, payload }
    }

    /// Rebuild a job from its wire representation
    pub fn from_wire(message: Value) -> Result<Self, JobError> {
        let Value::Object(mut object) = message else {
            return Err(JobError::Malformed {
                reason: format!("object expected, got {}", json_kind(&message)),
            });
        };

        let payload = object.remove("payload").unwrap_or(Value::Null);
        let meta = JobMeta::from_value(object.remove("meta").unwrap_or(Value::Null))?;
        Ok(Self { meta, payload })
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    pub fn meta(&self) -> &JobMeta {
        &self.meta
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn job_name(&self) -> Option<&str> {
        self.meta.job_name.as_deref()
    }

    /// Copy of this job stamped with its dequeue time
    pub fn with_dequeued(&self, at: DateTime<Utc>) -> Self {
        let mut meta = self.meta.clone();
        meta.dequeued = Some(at);
        Self {
            meta,
            payload: self.payload.clone(),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn into_parts(self) -> (JobMeta, Value) {
        (self.meta, self.payload)
    }
}

/// Short name of a JSON value's type, used in error messages
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
