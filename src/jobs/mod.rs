//! # Jobs
//!
//! Validation-gated dispatch on the producer side, runners on the consumer
//! side.

pub mod dispatcher;
pub mod errors;
pub mod result;
pub mod runner;
pub mod runners;
pub mod validator;

pub use dispatcher::{BatchOptions, DispatchMeta, JobDefinition, JobDispatcher};
pub use errors::{DispatchError, RunnerError};
pub use result::JobResult;
pub use runner::{
    JobRunner, RunFuture, RunInput, RunInvocation, RunMode, RunnerConfig, RunnerContext,
    RunnerKind,
};
pub use runners::{
    module_fn, JobModule, JobModuleRegistry, ModuleRunner, ModuleRunnerConfig, ProcessRunner,
    ProcessRunnerConfig, RunnerFactory,
};
pub use validator::{JobValidator, SchemaValidator, ValidationCause, ValidationError};
