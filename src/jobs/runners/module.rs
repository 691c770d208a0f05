//! Module runner
//!
//! Runs jobs through in-process handlers. Handlers are registered under a
//! module path in a [`JobModuleRegistry`]; a consumer's `module:` setting
//! names the path to load.

use std::fmt;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::jobs::errors::RunnerError;
use crate::jobs::result::JobResult;
use crate::jobs::runner::{JobRunner, RunInput, RunInvocation, RunMode, RunnerContext};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRunnerConfig {
    pub module: String,
}

impl ModuleRunnerConfig {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
        }
    }
}

/// An in-process job handler
///
/// Handlers must hand back deferred work. Returning
/// [`RunInvocation::Immediate`] is a contract violation reported as
/// `InvalidRunError` by the runner.
pub trait JobModule: Send + Sync {
    fn call(&self, input: RunInput, context: RunnerContext) -> Result<RunInvocation, RunnerError>;
}

/// Adapts an async closure into a [`JobModule`]
pub struct AsyncModule<F> {
    handler: F,
}

impl<F, Fut> JobModule for AsyncModule<F>
where
    F: Fn(RunInput, RunnerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn call(&self, input: RunInput, context: RunnerContext) -> Result<RunInvocation, RunnerError> {
        let work = (self.handler)(input, context);
        Ok(RunInvocation::deferred(async move {
            work.await.map(JobResult::success).map_err(|e| RunnerError::Module {
                message: format!("{e:#}"),
            })
        }))
    }
}

/// Wrap an async function as a job module
pub fn module_fn<F, Fut>(handler: F) -> Arc<dyn JobModule>
where
    F: Fn(RunInput, RunnerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(AsyncModule { handler })
}

/// Job modules addressable by path
#[derive(Default)]
pub struct JobModuleRegistry {
    modules: DashMap<String, Arc<dyn JobModule>>,
}

impl fmt::Debug for JobModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobModuleRegistry")
            .field("modules", &self.paths())
            .finish()
    }
}

impl JobModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `path`, replacing any previous registration
    pub fn register(&self, path: impl Into<String>, module: Arc<dyn JobModule>) {
        let path = normalize(Path::new(&path.into()));
        debug!(path = %path, "Job module registered");
        self.modules.insert(path, module);
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Find a module by its path as written, then relative to `cwd`
    pub fn resolve(&self, path: &str, cwd: &Path) -> Result<Arc<dyn JobModule>, RunnerError> {
        let as_written = normalize(Path::new(path));
        let from_cwd = normalize(&cwd.join(path));
        [as_written, from_cwd]
            .iter()
            .find_map(|candidate| self.modules.get(candidate).map(|m| m.value().clone()))
            .ok_or_else(|| RunnerError::ModuleLoad {
                path: path.to_string(),
                cwd: cwd.display().to_string(),
            })
    }
}

/// Lexical normalization: drops `.` and folds `..`
fn normalize(path: &Path) -> String {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.to_string_lossy().into_owned()
}

pub struct ModuleRunner {
    path: String,
    mode: RunMode,
    module: Arc<dyn JobModule>,
}

impl fmt::Debug for ModuleRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRunner")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

impl ModuleRunner {
    pub fn new(
        config: ModuleRunnerConfig,
        mode: RunMode,
        registry: &JobModuleRegistry,
        cwd: &Path,
    ) -> Result<Self, RunnerError> {
        if config.module.trim().is_empty() {
            return Err(RunnerError::Module {
                message: "Module path expected, got an empty string".to_string(),
            });
        }
        let module = registry.resolve(&config.module, cwd).inspect_err(|e| {
            error!(module = %config.module, error = %e, "Module can't be loaded");
        })?;

        Ok(Self {
            path: config.module,
            mode,
            module,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl JobRunner for ModuleRunner {
    fn name(&self) -> &'static str {
        "ModuleRunner"
    }

    fn mode(&self) -> RunMode {
        self.mode
    }

    fn invoke(&self, input: RunInput, context: RunnerContext) -> Result<RunInvocation, RunnerError> {
        info!(module = %self.path, "Calling loaded module");
        self.module.call(input, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{Job, JobMeta};
    use crate::metrics::MetricsRegistry;
    use serde_json::json;

    struct SyncModule;

    impl JobModule for SyncModule {
        fn call(&self, _input: RunInput, _context: RunnerContext) -> Result<RunInvocation, RunnerError> {
            Ok(RunInvocation::Immediate(json!(42)))
        }
    }

    fn context() -> RunnerContext {
        RunnerContext::new(Arc::new(MetricsRegistry::new().unwrap()))
    }

    #[test]
    fn test_resolve_relative_to_cwd() {
        let registry = JobModuleRegistry::new();
        registry.register(
            "/srv/app/jobs/echo",
            module_fn(|input, _ctx| async move { Ok::<_, anyhow::Error>(input.payload().clone()) }),
        );

        let cwd = Path::new("/srv/app");
        assert!(registry.resolve("jobs/echo", cwd).is_ok());
        assert!(registry.resolve("./jobs/../jobs/echo", cwd).is_ok());
        assert!(matches!(
            registry.resolve("jobs/missing", cwd),
            Err(RunnerError::ModuleLoad { .. })
        ));
    }

    #[test]
    fn test_empty_module_path_rejected() {
        let registry = JobModuleRegistry::new();
        let err = ModuleRunner::new(
            ModuleRunnerConfig::new(""),
            RunMode::Raw,
            &registry,
            Path::new("."),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Module path expected"));
    }

    #[tokio::test]
    async fn test_async_module_result() {
        let registry = JobModuleRegistry::new();
        registry.register(
            "double",
            module_fn(|input, _ctx| async move {
                let n = input.payload().as_i64().unwrap_or_default();
                Ok::<_, anyhow::Error>(json!(n * 2))
            }),
        );
        let runner = ModuleRunner::new(
            ModuleRunnerConfig::new("double"),
            RunMode::Raw,
            &registry,
            Path::new("/tmp"),
        )
        .unwrap();

        let result = runner.run(json!(21), context()).await.unwrap();
        assert_eq!(result.result, json!(42));
    }

    #[tokio::test]
    async fn test_module_error_is_reported() {
        let registry = JobModuleRegistry::new();
        registry.register(
            "boom",
            module_fn(|_input, _ctx| async move { Err::<Value, _>(anyhow::anyhow!("smtp refused")) }),
        );
        let runner =
            ModuleRunner::new(ModuleRunnerConfig::new("boom"), RunMode::Raw, &registry, Path::new("."))
                .unwrap();

        let err = runner.run(json!({}), context()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Module { ref message } if message == "smtp refused"));
    }

    #[tokio::test]
    async fn test_synchronous_module_is_invalid_run() {
        let registry = JobModuleRegistry::new();
        registry.register("sync", Arc::new(SyncModule));
        let runner =
            ModuleRunner::new(ModuleRunnerConfig::new("sync"), RunMode::Raw, &registry, Path::new("."))
                .unwrap();

        let err = runner.run(json!({}), context()).await.unwrap_err();
        assert!(err.is_invalid_run());
        assert_eq!(
            err.to_string(),
            "InvalidRunError: The ModuleRunner runner didn't return an asynchronous result. Got number"
        );
    }

    #[tokio::test]
    async fn test_wrapped_invalid_run_counts_as_failure() {
        let registry = JobModuleRegistry::new();
        registry.register("sync", Arc::new(SyncModule));
        let runner = ModuleRunner::new(
            ModuleRunnerConfig::new("sync"),
            RunMode::Wrapped,
            &registry,
            Path::new("."),
        )
        .unwrap();
        let ctx = context();
        let metrics = ctx.metrics.clone();
        let job = Job::new(json!({"to": "a@b.c"}), JobMeta::new().job_name("send-email"));

        let err = runner.run(job.to_value().unwrap(), ctx).await.unwrap_err();
        assert!(err.is_invalid_run());
        assert_eq!(metrics.runner().failure_count("send-email"), 1);
        assert_eq!(metrics.runner().success_count("send-email"), 0);
    }
}
