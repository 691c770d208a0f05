//! Runner implementations and the factory building them from configuration

mod module;
mod process;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use module::{
    module_fn, AsyncModule, JobModule, JobModuleRegistry, ModuleRunner, ModuleRunnerConfig,
};
pub use process::{ProcessRunner, ProcessRunnerConfig};

use super::errors::RunnerError;
use super::runner::{JobRunner, RunnerConfig, RunnerKind};

/// Builds runners for consumer bindings
#[derive(Debug, Clone)]
pub struct RunnerFactory {
    modules: Arc<JobModuleRegistry>,
    cwd: PathBuf,
}

impl RunnerFactory {
    /// `cwd` anchors relative command and module paths
    pub fn new(modules: Arc<JobModuleRegistry>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            modules,
            cwd: cwd.into(),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn create(&self, config: &RunnerConfig) -> Result<Arc<dyn JobRunner>, RunnerError> {
        let runner: Arc<dyn JobRunner> = match &config.kind {
            RunnerKind::Process(process) => {
                Arc::new(ProcessRunner::new(process.clone(), config.mode, &self.cwd)?)
            }
            RunnerKind::Module(module) => Arc::new(ModuleRunner::new(
                module.clone(),
                config.mode,
                &self.modules,
                &self.cwd,
            )?),
        };
        Ok(runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::runner::RunMode;

    #[test]
    fn test_factory_reports_missing_command() {
        let factory = RunnerFactory::new(Arc::new(JobModuleRegistry::new()), "/tmp");
        let config = RunnerConfig {
            mode: RunMode::Wrapped,
            kind: RunnerKind::Process(ProcessRunnerConfig::new("./no-such-binary")),
        };
        assert!(matches!(
            factory.create(&config),
            Err(RunnerError::CommandNotFound { .. })
        ));
    }

    #[test]
    fn test_factory_builds_process_runner() {
        let factory = RunnerFactory::new(Arc::new(JobModuleRegistry::new()), "/tmp");
        let config: RunnerConfig = serde_yaml::from_str("type: process\npath: sh\n").unwrap();
        let runner = factory.create(&config).unwrap();
        assert_eq!(runner.name(), "ProcessRunner");
        assert_eq!(runner.mode(), RunMode::Wrapped);
    }
}
