//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arnavon_core::config::{ArnavonConfig, JobConfig};
use arnavon_core::context::AppContext;
use arnavon_core::messaging::MemoryTransport;
use serde_json::{json, Value};

pub fn email_schema() -> Value {
    json!({
        "type": "object",
        "required": ["to"],
        "properties": {
            "to": { "type": "string" },
            "subject": { "type": "string" }
        }
    })
}

pub fn send_email_job() -> JobConfig {
    JobConfig {
        name: "send-email".to_string(),
        input_schema: email_schema(),
        invalid_job_exchange: None,
    }
}

/// Context over a memory transport the test can inspect
pub fn memory_context(jobs: Vec<JobConfig>) -> (AppContext, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let context = AppContext::with_transport(ArnavonConfig::in_memory(jobs), transport.clone())
        .expect("context builds");
    (context, transport)
}

/// Write an executable shell script
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script written");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("script executable");
    path
}
