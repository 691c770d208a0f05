//! Process runner
//!
//! Runs a job as a child process: the job (or raw message) is written to
//! stdin as one JSON line, stdout is captured as the result. Exit code 0 is
//! success. Each child leads its own process group; a run longer than the
//! timeout has the whole group terminated with SIGTERM, then SIGKILL after a
//! grace period.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::constants::process::{
    DEFAULT_KILL_GRACE, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT, MAX_STDERR_BYTES,
};
use crate::jobs::errors::RunnerError;
use crate::jobs::result::JobResult;
use crate::jobs::runner::{JobRunner, RunInput, RunInvocation, RunMode, RunnerContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRunnerConfig {
    /// Command: absolute, relative to the config directory, or a name on `PATH`
    pub path: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_kill_grace_ms() -> u64 {
    DEFAULT_KILL_GRACE.as_millis() as u64
}

/// Accept `args: "--flag"` as well as `args: ["--flag"]`
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(arg)) => vec![arg],
        Some(OneOrMany::Many(args)) => args,
    })
}

impl ProcessRunnerConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            kill_grace_ms: default_kill_grace_ms(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace_ms = grace.as_millis() as u64;
        self
    }
}

/// Resolved, immutable execution settings shared with in-flight runs
#[derive(Debug)]
struct ProcessSettings {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
    kill_grace: Duration,
    max_output_bytes: usize,
}

#[derive(Debug)]
pub struct ProcessRunner {
    mode: RunMode,
    settings: Arc<ProcessSettings>,
}

impl ProcessRunner {
    /// Build a runner, checking the command exists and is executable
    pub fn new(config: ProcessRunnerConfig, mode: RunMode, cwd: &Path) -> Result<Self, RunnerError> {
        let program = resolve_command(&config.path, cwd)?;
        debug!(program = %program.display(), "Process runner ready");

        Ok(Self {
            mode,
            settings: Arc::new(ProcessSettings {
                program,
                args: config.args,
                env: config.env,
                timeout: Duration::from_millis(config.timeout_ms),
                kill_grace: Duration::from_millis(config.kill_grace_ms),
                max_output_bytes: config.max_output_bytes,
            }),
        })
    }

    pub fn program(&self) -> &Path {
        &self.settings.program
    }
}

impl JobRunner for ProcessRunner {
    fn name(&self) -> &'static str {
        "ProcessRunner"
    }

    fn mode(&self) -> RunMode {
        self.mode
    }

    fn invoke(&self, input: RunInput, _context: RunnerContext) -> Result<RunInvocation, RunnerError> {
        let mut line = serde_json::to_vec(&input).map_err(RunnerError::io)?;
        line.push(b'\n');
        let settings = self.settings.clone();
        Ok(RunInvocation::deferred(execute(settings, line)))
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Locate `command` the way a shell would
fn resolve_command(command: &str, cwd: &Path) -> Result<PathBuf, RunnerError> {
    let not_found = || RunnerError::CommandNotFound {
        command: command.to_string(),
    };
    if command.is_empty() {
        return Err(not_found());
    }

    if command.contains('/') {
        let path = Path::new(command);
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        };
        return if is_executable(&candidate) {
            Ok(candidate)
        } else {
            Err(not_found())
        };
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(command))
                .find(|candidate| is_executable(candidate))
        })
        .ok_or_else(not_found)
}

#[derive(Debug, Default)]
struct CapturedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read a stream to its end, keeping at most `limit` bytes
///
/// The stream is drained past the limit so the child never blocks on a
/// full pipe.
async fn read_bounded<R>(mut reader: R, limit: usize) -> std::io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut output = CapturedOutput::default();
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(output);
        }
        let room = limit.saturating_sub(output.bytes.len());
        if read > room {
            output.truncated = true;
        }
        output.bytes.extend_from_slice(&chunk[..read.min(room)]);
    }
}

/// JSON when stdout parses as JSON, the text otherwise
fn parse_output(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn signal_group(group: Option<Pid>, sig: Signal) {
    let Some(group) = group else {
        return;
    };
    if let Err(e) = signal::killpg(group, sig) {
        debug!(pgid = group.as_raw(), signal = sig.as_str(), error = %e, "Signal not delivered");
    }
}

/// SIGTERM to the process group, then SIGKILL once the grace period expires
///
/// The child leads its own group, so anything it started is signalled too.
async fn terminate(child: &mut Child, grace: Duration) {
    let group = child.id().map(|pid| Pid::from_raw(pid as i32));
    signal_group(group, Signal::SIGTERM);

    let exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
    if !exited {
        warn!(pgid = ?group, "Process ignored SIGTERM, sending SIGKILL");
    }
    // Descendants can outlive a child that obeyed SIGTERM
    signal_group(group, Signal::SIGKILL);
    if !exited {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "SIGKILL failed");
        }
    }
}

async fn collect<T>(task: tokio::task::JoinHandle<std::io::Result<T>>, grace: Duration) -> T
where
    T: Default,
{
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(Ok(output))) => output,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "Failed reading process output");
            T::default()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            T::default()
        }
        Err(_) => {
            warn!("Process output still open after exit, giving up on it");
            T::default()
        }
    }
}

async fn execute(settings: Arc<ProcessSettings>, line: Vec<u8>) -> Result<JobResult, RunnerError> {
    let command_name = settings.program.display().to_string();
    let mut child = Command::new(&settings.program)
        .args(&settings.args)
        .envs(&settings.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RunnerError::spawn(&command_name, e))?;
    info!(command = %command_name, pid = ?child.id(), "Process spawned");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::io("stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::io("stderr was not captured"))?;
    let stdout_task = tokio::spawn(read_bounded(stdout, settings.max_output_bytes));
    let stderr_task = tokio::spawn(read_bounded(stderr, MAX_STDERR_BYTES));

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RunnerError::io("stdin was not captured"))?;
    let stdin_task = tokio::spawn(async move {
        stdin.write_all(&line).await?;
        stdin.shutdown().await?;
        Ok::<_, std::io::Error>(())
    });

    let status = match tokio::time::timeout(settings.timeout, child.wait()).await {
        Ok(status) => Some(status.map_err(RunnerError::io)?),
        Err(_) => {
            warn!(command = %command_name, timeout_ms = settings.timeout.as_millis() as u64, "Process timed out");
            terminate(&mut child, settings.kill_grace).await;
            None
        }
    };

    match tokio::time::timeout(settings.kill_grace, stdin_task).await {
        Ok(Ok(Ok(()))) | Err(_) => {}
        // Exited without reading its input; the exit status decides
        Ok(Ok(Err(e))) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!(command = %command_name, "Process closed stdin early");
        }
        Ok(Ok(Err(e))) if status.is_some() => {
            return Err(RunnerError::Stdin {
                message: e.to_string(),
            });
        }
        Ok(Ok(Err(_))) => {}
        Ok(Err(e)) => warn!(error = %e, "Stdin writer task failed"),
    }

    let captured = collect(stdout_task, settings.kill_grace).await;
    let diagnostics = collect(stderr_task, settings.kill_grace).await;
    if !diagnostics.bytes.is_empty() {
        warn!(
            command = %command_name,
            stderr = %String::from_utf8_lossy(&diagnostics.bytes),
            "Process wrote to stderr"
        );
    }
    if captured.truncated {
        warn!(
            command = %command_name,
            limit = settings.max_output_bytes,
            "Process output truncated"
        );
    }

    let output = parse_output(&captured.bytes);
    let result = match status {
        None => JobResult::failure(
            format!("Process timed out after {} ms", settings.timeout.as_millis()),
            output,
        ),
        Some(status) => match (status.code(), status.signal()) {
            (Some(0), _) => JobResult::success(output),
            (Some(code), _) => JobResult::failure(format!("Process exited with code {code}"), output),
            (None, Some(signal)) => {
                let name = Signal::try_from(signal)
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|_| signal.to_string());
                JobResult::failure(format!("Process killed by signal {name}"), output)
            }
            (None, None) => JobResult::failure("Process ended without exit status", output),
        },
    };
    Ok(result.with_truncated(captured.truncated))
}
