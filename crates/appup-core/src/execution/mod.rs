pub mod tokio_process;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::models::{CoreError, CoreErrorKind, ToolAction};

pub use tokio_process::TokioProcessExecutor;

pub type ExecutionResult<T> = Result<T, CoreError>;

pub type ProcessWaitFuture = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn validate(&self, action: ToolAction) -> ExecutionResult<()> {
        if self.program.as_os_str().is_empty() {
            return Err(invalid_input(
                action,
                "command program path must not be empty",
            ));
        }

        if self
            .args
            .iter()
            .any(|arg| arg.is_empty() || arg.contains('\0'))
        {
            return Err(invalid_input(
                action,
                "command args must be non-empty and must not contain NUL bytes",
            ));
        }

        if self
            .env
            .iter()
            .any(|(key, value)| key.is_empty() || key.contains('\0') || value.contains('\0'))
        {
            return Err(invalid_input(
                action,
                "environment keys and values must be non-empty and must not contain NUL bytes",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub action: ToolAction,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
}

impl ProcessSpawnRequest {
    pub fn new(action: ToolAction, command: CommandSpec) -> Self {
        Self {
            action,
            command,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn maybe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        self.command.validate(self.action)?;

        if let Some(timeout) = self.timeout
            && timeout.is_zero()
        {
            return Err(invalid_input(
                self.action,
                "timeout must be greater than zero when provided",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessTerminationMode {
    Graceful,
    Immediate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    Terminated,
}

impl ProcessExitStatus {
    pub fn success(self) -> bool {
        self == Self::ExitCode(0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

/// Line-by-line view of a running child.
///
/// `stdout_lines` yields every stdout line (split on `\n` and `\r`) in the order
/// it was written and closes once the child's stdout is exhausted. `completion`
/// resolves after exit; its `stdout` is empty because the lines were already
/// delivered through the channel.
pub struct ProcessStream {
    pub stdout_lines: UnboundedReceiver<String>,
    pub completion: ProcessWaitFuture,
}

pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Requests termination. Safe to call from any thread, any number of times,
    /// including after the child has exited.
    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()>;

    /// Waits for exit and collects both streams. Consumes the child; a second
    /// call to `wait` or `stream` fails.
    fn wait(&self) -> ProcessWaitFuture;

    /// Starts forwarding stdout lines. Must be called within a tokio runtime
    /// context. Consumes the child like `wait`.
    fn stream(&self) -> ExecutionResult<ProcessStream>;
}

pub trait ProcessExecutor: Send + Sync {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Arc<dyn RunningProcess>>;
}

pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<Arc<dyn RunningProcess>> {
    request.validate()?;
    executor.spawn(request)
}

/// Decoded result of one completed invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutcome {
    pub status: ProcessExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn from_output(output: &ProcessOutput) -> Self {
        Self {
            status: output.status,
            stdout: decode_stream(&output.stdout),
            stderr: decode_stream(&output.stderr),
        }
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ProcessExitStatus::ExitCode(code) => Some(code),
            ProcessExitStatus::Terminated => None,
        }
    }
}

/// Lossy UTF-8 decode with trailing whitespace removed.
pub fn decode_stream(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

/// Blocking facade over a [`ProcessExecutor`].
///
/// Every call blocks the current thread until the child is done, so it must be
/// used from a worker thread that is not itself driving the tokio runtime.
/// Spawning enters the runtime first; the tokio executor registers the child
/// with the runtime's reactor.
#[derive(Clone)]
pub struct ProcessRunner {
    executor: Arc<dyn ProcessExecutor>,
    runtime: Handle,
}

impl ProcessRunner {
    pub fn new(executor: Arc<dyn ProcessExecutor>, runtime: Handle) -> Self {
        Self { executor, runtime }
    }

    /// Runs the request to completion. A non-zero exit code is reported in the
    /// outcome, not as an error; only spawn and wait failures are errors.
    pub fn run(&self, request: ProcessSpawnRequest) -> ExecutionResult<CommandOutcome> {
        tracing::debug!(
            action = ?request.action,
            program = %request.command.program.display(),
            args = ?request.command.args,
            "running tool command"
        );
        let _context = self.runtime.enter();
        let process = spawn_validated(self.executor.as_ref(), request)?;
        let output = self.runtime.block_on(process.wait())?;
        Ok(CommandOutcome::from_output(&output))
    }

    pub fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Arc<dyn RunningProcess>> {
        tracing::debug!(
            action = ?request.action,
            program = %request.command.program.display(),
            args = ?request.command.args,
            "spawning tool command"
        );
        let _context = self.runtime.enter();
        spawn_validated(self.executor.as_ref(), request)
    }

    pub fn open_stream(&self, process: &dyn RunningProcess) -> ExecutionResult<ProcessStream> {
        let _context = self.runtime.enter();
        process.stream()
    }

    /// Blocks until the next stdout line arrives, or returns `None` once the
    /// stream is closed.
    pub fn next_line(&self, stream: &mut ProcessStream) -> Option<String> {
        self.runtime.block_on(stream.stdout_lines.recv())
    }

    pub fn finish(&self, stream: ProcessStream) -> ExecutionResult<ProcessOutput> {
        self.runtime.block_on(stream.completion)
    }
}

fn invalid_input(action: ToolAction, message: &str) -> CoreError {
    CoreError::for_action(action, CoreErrorKind::InvalidInput, message)
}
