//! Payload validation
//!
//! [`JobValidator`] is the contract the dispatcher relies on; the provided
//! implementation checks payloads against a JSON Schema (draft 7).

use std::fmt;

use jsonschema::{Draft, JSONSchema};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{ConfigResult, ConfigurationError};

/// One reason a payload was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationCause {
    pub message: String,
    /// JSON pointer to the offending value
    pub location: String,
}

impl fmt::Display for ValidationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = if self.location.is_empty() {
            "/"
        } else {
            self.location.as_str()
        };
        write!(f, "{} ({})", self.message, location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid input data: {}", format_causes(.root_causes))]
pub struct ValidationError {
    pub root_causes: Vec<ValidationCause>,
}

fn format_causes(causes: &[ValidationCause]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl ValidationError {
    pub fn new(root_causes: Vec<ValidationCause>) -> Self {
        Self { root_causes }
    }

    pub fn single(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(vec![ValidationCause {
            message: message.into(),
            location: location.into(),
        }])
    }
}

/// Validates (and may normalise) a raw payload
pub trait JobValidator: Send + Sync + fmt::Debug {
    fn validate(&self, raw: &Value) -> Result<Value, ValidationError>;
}

/// JSON Schema backed validator
pub struct SchemaValidator {
    schema: JSONSchema,
    source: Value,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schema", &self.source)
            .finish()
    }
}

impl SchemaValidator {
    /// Compile `schema` for `job_name`
    pub fn compile(job_name: &str, schema: &Value) -> ConfigResult<Self> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| ConfigurationError::invalid_schema(job_name, e))?;

        Ok(Self {
            schema: compiled,
            source: schema.clone(),
        })
    }

    pub fn schema(&self) -> &Value {
        &self.source
    }
}

impl JobValidator for SchemaValidator {
    fn validate(&self, raw: &Value) -> Result<Value, ValidationError> {
        match self.schema.validate(raw) {
            Ok(()) => Ok(raw.clone()),
            Err(errors) => Err(ValidationError::new(
                errors
                    .map(|e| ValidationCause {
                        message: e.to_string().replace('\n', " "),
                        location: e.instance_path.to_string(),
                    })
                    .collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email_validator() -> SchemaValidator {
        SchemaValidator::compile(
            "send-email",
            &json!({
                "type": "object",
                "required": ["to"],
                "properties": {"to": {"type": "string"}}
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_payload_passes_through() {
        let payload = json!({"to": "a@b.c"});
        assert_eq!(email_validator().validate(&payload).unwrap(), payload);
    }

    #[test]
    fn test_invalid_payload_reports_causes() {
        let err = email_validator().validate(&json!({"to": 42})).unwrap_err();
        assert_eq!(err.root_causes.len(), 1);
        assert_eq!(err.root_causes[0].location, "/to");
        assert!(err.to_string().starts_with("Invalid input data: "));
        assert!(err.to_string().ends_with("(/to)"));
    }

    #[test]
    fn test_bad_schema_is_a_configuration_error() {
        let err = SchemaValidator::compile("broken", &json!({"type": "no-such-type"})).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSchema { .. }));
    }
}
