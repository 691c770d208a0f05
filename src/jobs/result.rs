//! Job run outcome

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of running a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Value,
    /// Captured output was cut at the configured limit
    #[serde(default)]
    pub truncated: bool,
}

impl JobResult {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            error: None,
            result,
            truncated: false,
        }
    }

    pub fn failure(error: impl Into<String>, result: Value) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            result,
            truncated: false,
        }
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }
}
