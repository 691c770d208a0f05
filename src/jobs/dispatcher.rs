//! # Job Dispatcher
//!
//! Validation-gated publish. A payload only reaches the queue once it has
//! passed the job's validator; rejected payloads can be copied to a
//! side-channel exchange for inspection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::errors::DispatchError;
use super::validator::{JobValidator, SchemaValidator};
use crate::config::{ConfigResult, ConfigurationError, JobConfig};
use crate::messaging::job::json_kind;
use crate::messaging::{Job, JobMeta, PushOptions, QueueTransport};
use crate::metrics::MetricsRegistry;

/// A dispatchable job and its validation rules
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub name: String,
    pub validator: Arc<dyn JobValidator>,
    pub invalid_job_exchange: Option<String>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, validator: Arc<dyn JobValidator>) -> Self {
        Self {
            name: name.into(),
            validator,
            invalid_job_exchange: None,
        }
    }

    pub fn with_invalid_job_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.invalid_job_exchange = Some(exchange.into());
        self
    }

    pub fn from_config(config: &JobConfig) -> ConfigResult<Self> {
        let validator = SchemaValidator::compile(&config.name, &config.input_schema)?;
        Ok(Self {
            name: config.name.clone(),
            validator: Arc::new(validator),
            invalid_job_exchange: config.invalid_job_exchange.clone(),
        })
    }
}

/// Caller-supplied metadata for a dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchMeta {
    /// Becomes the job id (single) or the batch id (batch)
    pub correlation_id: Option<String>,
    /// Extra keys merged into the job metadata
    pub extra: Map<String, Value>,
}

impl DispatchMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Metadata for one job; `jobName` and `dispatched` always win over caller keys
    fn job_meta(&self, job_name: &str, id: Option<&str>) -> Result<JobMeta, DispatchError> {
        let mut meta = match id {
            Some(id) => JobMeta::with_id(id)?,
            None => JobMeta::new(),
        };
        meta.extra = self.extra.clone();
        for reserved in ["id", "jobName", "dispatched", "dequeued", "batchId"] {
            meta.extra.remove(reserved);
        }
        Ok(meta.job_name(job_name).dispatched_at(Utc::now()))
    }

    /// Batch id from the correlation id
    ///
    /// A UUID is used as is, any other string maps to a stable v5 UUID.
    fn batch_id(&self) -> Uuid {
        match self.correlation_id.as_deref() {
            Some(id) => Uuid::parse_str(id)
                .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes())),
            None => Uuid::new_v4(),
        }
    }
}

/// Batch dispatch options
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Refuse the whole batch when any element is invalid
    pub strict: bool,
    pub push: PushOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            strict: true,
            push: PushOptions::default(),
        }
    }
}

impl BatchOptions {
    pub fn best_effort() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }
}

/// Validates payloads and publishes them as jobs
pub struct JobDispatcher {
    jobs: HashMap<String, JobDefinition>,
    transport: Arc<dyn QueueTransport>,
    metrics: Arc<MetricsRegistry>,
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .field("transport", &self.transport.provider_name())
            .finish()
    }
}

impl JobDispatcher {
    pub fn new(
        definitions: Vec<JobDefinition>,
        transport: Arc<dyn QueueTransport>,
        metrics: Arc<MetricsRegistry>,
    ) -> ConfigResult<Self> {
        let mut jobs = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let name = definition.name.clone();
            if jobs.insert(name.clone(), definition).is_some() {
                return Err(ConfigurationError::DuplicateJob { job_name: name });
            }
        }
        Ok(Self {
            jobs,
            transport,
            metrics,
        })
    }

    pub fn from_config(
        configs: &[JobConfig],
        transport: Arc<dyn QueueTransport>,
        metrics: Arc<MetricsRegistry>,
    ) -> ConfigResult<Self> {
        let definitions = configs
            .iter()
            .map(JobDefinition::from_config)
            .collect::<ConfigResult<Vec<_>>>()?;
        Self::new(definitions, transport, metrics)
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    /// The validator registered for `job_name`
    pub fn validator_for(&self, job_name: &str) -> Option<Arc<dyn JobValidator>> {
        self.jobs.get(job_name).map(|d| d.validator.clone())
    }

    fn definition(&self, job_name: &str) -> Result<&JobDefinition, DispatchError> {
        self.jobs.get(job_name).ok_or_else(|| {
            self.metrics.dispatcher().record_unknown(job_name);
            warn!(job_name, "Dispatch of unknown job refused");
            DispatchError::unknown_job(job_name)
        })
    }

    /// Validate and publish one job
    pub async fn dispatch(
        &self,
        job_name: &str,
        payload: Value,
        meta: DispatchMeta,
        options: PushOptions,
    ) -> Result<Job, DispatchError> {
        let definition = self.definition(job_name)?;

        let validated = match definition.validator.validate(&payload) {
            Ok(validated) => validated,
            Err(err) => {
                self.metrics.dispatcher().record_invalid(job_name, 1);
                warn!(job_name, error = %err, "Invalid job payload");
                self.forward_invalid(definition, &payload).await;
                return Err(err.into());
            }
        };

        let job_meta = meta.job_meta(job_name, meta.correlation_id.as_deref())?;
        self.metrics.dispatcher().record_valid(job_name, 1);

        let job = Job::new(validated, job_meta);
        self.transport
            .push(job_name, &job.to_value()?, &options)
            .await?;

        info!(job_name, job_id = %job.id(), "Job dispatched");
        Ok(job)
    }

    /// Validate and publish an array of payloads
    ///
    /// In strict mode nothing is published when any element is invalid. In
    /// best-effort mode the valid elements are published and the call still
    /// fails with [`DispatchError::InvalidBatch`] listing what was rejected.
    /// Rejected elements are reported to the caller only, never forwarded to
    /// the invalid job exchange.
    pub async fn dispatch_batch(
        &self,
        job_name: &str,
        payloads: Value,
        meta: DispatchMeta,
        options: BatchOptions,
    ) -> Result<Vec<Job>, DispatchError> {
        let definition = self.definition(job_name)?;

        let Value::Array(payloads) = payloads else {
            return Err(DispatchError::data_validation(format!(
                "Array of payloads expected for batches, got {}",
                json_kind(&payloads)
            )));
        };

        let mut valids = Vec::new();
        let mut validated = Vec::new();
        let mut invalids = Vec::new();
        for payload in payloads {
            match definition.validator.validate(&payload) {
                Ok(value) => {
                    validated.push(value);
                    valids.push(payload);
                }
                Err(err) => {
                    debug!(job_name, error = %err, "Invalid batch element");
                    invalids.push(payload);
                }
            }
        }

        if !invalids.is_empty() {
            self.metrics
                .dispatcher()
                .record_invalid(job_name, invalids.len() as u64);
            if options.strict {
                warn!(job_name, invalid = invalids.len(), "Strict batch refused");
                return Err(invalid_batch(valids, invalids, Vec::new()));
            }
        }

        let batch_id = meta.batch_id();
        let jobs = validated
            .into_iter()
            .map(|payload| Ok(Job::new(payload, meta.job_meta(job_name, None)?.batch(batch_id))))
            .collect::<Result<Vec<_>, DispatchError>>()?;

        let messages = jobs
            .iter()
            .map(Job::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(
            messages
                .iter()
                .map(|message| self.transport.push(job_name, message, &options.push)),
        )
        .await?;
        self.metrics
            .dispatcher()
            .record_valid(job_name, jobs.len() as u64);

        info!(job_name, batch_id = %batch_id, count = jobs.len(), "Batch dispatched");

        if invalids.is_empty() {
            Ok(jobs)
        } else {
            Err(invalid_batch(valids, invalids, jobs))
        }
    }

    /// Copy a rejected payload to the job's invalid exchange, if it has one
    async fn forward_invalid(&self, definition: &JobDefinition, payload: &Value) {
        let Some(exchange) = &definition.invalid_job_exchange else {
            return;
        };
        let options = PushOptions::new().with_exchange(exchange.clone());
        if let Err(err) = self.transport.push(&definition.name, payload, &options).await {
            error!(
                job_name = %definition.name,
                exchange = %exchange,
                error = %err,
                "Failed to forward invalid job"
            );
        }
    }
}

fn invalid_batch(valids: Vec<Value>, invalids: Vec<Value>, published: Vec<Job>) -> DispatchError {
    DispatchError::InvalidBatch {
        message: format!("{} job payloads are invalid", invalids.len()),
        valids,
        invalids,
        published,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_from_correlation_id() {
        let uuid = Uuid::new_v4();
        let meta = DispatchMeta::new().with_correlation_id(uuid.to_string());
        assert_eq!(meta.batch_id(), uuid);

        let named = DispatchMeta::new().with_correlation_id("nightly-import");
        assert_eq!(named.batch_id(), named.batch_id());
        assert_eq!(named.batch_id().get_version_num(), 5);
    }

    #[test]
    fn test_job_meta_protects_reserved_keys() {
        let meta = DispatchMeta::new()
            .with_field("jobName", Value::from("spoofed"))
            .with_field("tenant", Value::from("acme"));
        let job_meta = meta.job_meta("send-email", None).unwrap();

        assert_eq!(job_meta.job_name.as_deref(), Some("send-email"));
        assert!(job_meta.dispatched.is_some());
        assert_eq!(job_meta.extra.get("tenant"), Some(&Value::from("acme")));
        assert!(!job_meta.extra.contains_key("jobName"));
    }

    #[test]
    fn test_job_meta_rejects_non_uuid_id() {
        let meta = DispatchMeta::new();
        assert!(matches!(
            meta.job_meta("send-email", Some("not-a-uuid")),
            Err(DispatchError::InvalidJob(_))
        ));
    }
}
