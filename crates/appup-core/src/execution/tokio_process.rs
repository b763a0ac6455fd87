use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessStream, ProcessTerminationMode, ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind, ToolAction};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const READ_DEADLINE: Duration = Duration::from_millis(250);

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Arc<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let child = cmd.spawn().map_err(|error| {
            process_failure(request.action, format!("failed to spawn process: {error}"))
        })?;

        let pid = child.id();

        Ok(Arc::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at: SystemTime::now(),
            exit: Arc::new(ExitWatch {
                timeout: request.timeout,
                action: request.action,
                pid,
                exited: AtomicBool::new(false),
                kill_requested: Notify::new(),
            }),
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    exit: Arc<ExitWatch>,
}

impl TokioRunningProcess {
    fn take_child(&self) -> ExecutionResult<Child> {
        let mut slot = self
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.take().ok_or_else(|| {
            process_failure(self.exit.action, "child process already consumed".to_string())
        })
    }
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        if self.exit.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.exit.signal(mode)
    }

    fn wait(&self) -> ProcessWaitFuture {
        let child = self.take_child();
        let exit = self.exit.clone();
        let started_at = self.started_at;

        Box::pin(async move {
            let mut child = child?;
            let stdout_reader = spawn_collect(child.stdout.take());
            let stderr_reader = spawn_collect(child.stderr.take());

            let status = match exit.wait(&mut child).await {
                Ok(status) => status,
                Err(error) => {
                    stdout_reader.abort();
                    stderr_reader.abort();
                    return Err(error);
                }
            };

            // Descendants may keep the pipes open after the child exits, so
            // output collection is bounded.
            let stdout = collect_with_deadline(stdout_reader).await;
            let stderr = collect_with_deadline(stderr_reader).await;

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }

    fn stream(&self) -> ExecutionResult<ProcessStream> {
        let mut child = self.take_child()?;
        let exit = self.exit.clone();
        let started_at = self.started_at;
        let action = exit.action;

        let (line_sender, stdout_lines) = mpsc::unbounded_channel();
        let mut stdout_forwarder = tokio::spawn(forward_lines(child.stdout.take(), line_sender));
        let stderr_reader = spawn_collect(child.stderr.take());

        let waiter = tokio::spawn(async move {
            let status = match exit.wait(&mut child).await {
                Ok(status) => status,
                Err(error) => {
                    stdout_forwarder.abort();
                    stderr_reader.abort();
                    return Err(error);
                }
            };

            // Aborting the forwarder drops the sender, which closes the line
            // channel even when a descendant still holds stdout.
            if tokio::time::timeout(READ_DEADLINE, &mut stdout_forwarder)
                .await
                .is_err()
            {
                stdout_forwarder.abort();
            }
            let stderr = collect_with_deadline(stderr_reader).await;

            Ok(ProcessOutput {
                status,
                stdout: Vec::new(),
                stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        });

        let completion: ProcessWaitFuture = Box::pin(async move {
            waiter.await.map_err(|error| {
                process_failure(action, format!("process waiter task failed: {error}"))
            })?
        });

        Ok(ProcessStream {
            stdout_lines,
            completion,
        })
    }
}

struct ExitWatch {
    timeout: Option<Duration>,
    action: ToolAction,
    pid: Option<u32>,
    exited: AtomicBool,
    kill_requested: Notify,
}

impl ExitWatch {
    async fn wait(&self, child: &mut Child) -> ExecutionResult<ProcessExitStatus> {
        let wait_err = |error: std::io::Error| {
            process_failure(self.action, format!("failed to wait for process: {error}"))
        };

        let status = if let Some(timeout_duration) = self.timeout {
            match tokio::time::timeout(timeout_duration, self.wait_or_kill(child)).await {
                Ok(result) => result.map_err(wait_err)?,
                Err(_) => {
                    let _ = self.signal(ProcessTerminationMode::Immediate);
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                    self.exited.store(true, Ordering::SeqCst);
                    return Err(CoreError::for_action(
                        self.action,
                        CoreErrorKind::Timeout,
                        format!("process timed out after {}ms", timeout_duration.as_millis()),
                    ));
                }
            }
        } else {
            self.wait_or_kill(child).await.map_err(wait_err)?
        };

        self.exited.store(true, Ordering::SeqCst);

        Ok(match status.code() {
            Some(code) => ProcessExitStatus::ExitCode(code),
            None => ProcessExitStatus::Terminated,
        })
    }

    async fn wait_or_kill(&self, child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
        tokio::select! {
            status = child.wait() => status,
            _ = self.kill_requested.notified() => {
                let _ = child.start_kill();
                child.wait().await
            }
        }
    }

    #[cfg(unix)]
    fn signal(&self, mode: ProcessTerminationMode) -> ExecutionResult<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let signal = match mode {
            ProcessTerminationMode::Immediate => libc::SIGKILL,
            ProcessTerminationMode::Graceful => libc::SIGTERM,
        };

        // The child leads its own process group; signal the whole group.
        let pgid = -(pid as libc::pid_t);
        let result = unsafe { libc::kill(pgid, signal) };

        if result != 0 {
            let os_error = std::io::Error::last_os_error();
            if os_error.raw_os_error() != Some(libc::ESRCH) {
                return Err(process_failure(
                    self.action,
                    format!("failed to send signal {signal} to process group {pid}: {os_error}"),
                ));
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn signal(&self, _mode: ProcessTerminationMode) -> ExecutionResult<()> {
        self.kill_requested.notify_one();
        Ok(())
    }
}

fn spawn_collect<R>(stream: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut handle) = stream {
            let _ = handle.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

async fn collect_with_deadline(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(READ_DEADLINE, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

async fn forward_lines<R>(stream: Option<R>, lines: UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut stream) = stream else {
        return;
    };

    let mut buffer = LineBuffer::default();
    let mut chunk = [0u8; 4096];
    loop {
        let read = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        for line in buffer.push(&chunk[..read]) {
            if lines.send(line).is_err() {
                return;
            }
        }
    }

    if let Some(line) = buffer.finish() {
        let _ = lines.send(line);
    }
}

/// Splits a byte stream into lines on `\n` or `\r`, so carriage-return
/// redraws come out as separate lines. Bytes are only decoded once a line is
/// complete, keeping multi-byte characters split across reads intact.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    pub(crate) fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

fn process_failure(action: ToolAction, message: String) -> CoreError {
    CoreError::for_action(action, CoreErrorKind::ProcessFailure, message)
}
