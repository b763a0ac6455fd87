use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::UpdaterConfig;
use crate::execution::{ProcessExitStatus, ProcessRunner, ProcessTerminationMode, RunningProcess};
use crate::models::{BatchResult, BatchTarget, CoreResult, ItemReport, TargetOutcome};
use crate::winget::winget_upgrade_request;

/// Stop signal for one batch, shared between the thread running the batch
/// and whichever thread handles user input.
///
/// Cancelling sets a flag that the batch polls before each target and before
/// each output line, and also terminates the child that is running right now.
#[derive(Clone, Default)]
pub struct BatchCancellationToken {
    flag: Arc<AtomicBool>,
    active: Arc<Mutex<Option<Arc<dyn RunningProcess>>>>,
}

impl BatchCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(process) = active {
            terminate_quietly(process.as_ref());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn attach(&self, process: Arc<dyn RunningProcess>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(process);
    }

    fn detach(&self) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Debug for BatchCancellationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Whether a stdout line is only a frame of the tool's text spinner.
pub fn is_spinner_frame(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_whitespace() || matches!(c, '\\' | '/' | '|' | '-'))
}

/// Upgrades packages one at a time, in the order given.
pub struct UpgradeBatchRunner {
    runner: ProcessRunner,
    config: UpdaterConfig,
}

impl UpgradeBatchRunner {
    pub fn new(runner: ProcessRunner, config: UpdaterConfig) -> Self {
        Self { runner, config }
    }

    /// Runs every target unless `token` is cancelled first.
    ///
    /// `on_item_start` fires with the target's index right before it is
    /// spawned. `on_line` receives the tool's output for the current target,
    /// spinner frames removed, stderr after stdout. `on_item_done` fires
    /// exactly once for every target that was started, whatever its outcome.
    /// A failing target never stops the batch; only cancellation does, and it
    /// takes effect before the next target starts.
    pub fn run_batch<S, L, D>(
        &self,
        targets: &[BatchTarget],
        include_unknown: bool,
        token: &BatchCancellationToken,
        mut on_item_start: S,
        mut on_line: L,
        mut on_item_done: D,
    ) -> BatchResult
    where
        S: FnMut(usize, &BatchTarget),
        L: FnMut(&BatchTarget, &str),
        D: FnMut(ItemReport<'_>),
    {
        let total = targets.len();
        let mut result = BatchResult {
            total,
            ..BatchResult::default()
        };

        for (index, target) in targets.iter().enumerate() {
            if token.is_cancelled() {
                tracing::info!(
                    remaining = total - index,
                    "batch cancelled before next package"
                );
                break;
            }

            tracing::info!(package = %target.identifier, index, total, "upgrading package");
            on_item_start(index, target);
            let outcome = self.upgrade_one(target, include_unknown, token, &mut on_line);
            token.detach();

            if let TargetOutcome::Failed { message } = &outcome {
                tracing::warn!(package = %target.identifier, message = %message, "upgrade failed");
                result.failed += 1;
            }
            result.completed += 1;

            on_item_done(ItemReport {
                index,
                total,
                target,
                outcome: &outcome,
            });
        }

        result.cancelled = token.is_cancelled();
        result
    }

    fn upgrade_one<L>(
        &self,
        target: &BatchTarget,
        include_unknown: bool,
        token: &BatchCancellationToken,
        on_line: &mut L,
    ) -> TargetOutcome
    where
        L: FnMut(&BatchTarget, &str),
    {
        match self.stream_upgrade(target, include_unknown, token, on_line) {
            Ok(status) if status.success() => TargetOutcome::Succeeded,
            Ok(_) if token.is_cancelled() => TargetOutcome::Terminated,
            Ok(ProcessExitStatus::ExitCode(code)) => TargetOutcome::Failed {
                message: format!("winget exited with code {code}"),
            },
            Ok(ProcessExitStatus::Terminated) => TargetOutcome::Failed {
                message: "winget was terminated".to_string(),
            },
            Err(error) => {
                on_line(target, &format!("Error: {}", error.message));
                TargetOutcome::Failed {
                    message: error.message,
                }
            }
        }
    }

    fn stream_upgrade<L>(
        &self,
        target: &BatchTarget,
        include_unknown: bool,
        token: &BatchCancellationToken,
        on_line: &mut L,
    ) -> CoreResult<ProcessExitStatus>
    where
        L: FnMut(&BatchTarget, &str),
    {
        let request = winget_upgrade_request(&self.config, target, include_unknown);
        let process = self.runner.spawn(request)?;
        token.attach(process.clone());

        let mut stream = self.runner.open_stream(process.as_ref())?;
        let mut termination_sent = false;
        loop {
            if token.is_cancelled() && !termination_sent {
                termination_sent = true;
                terminate_quietly(process.as_ref());
            }
            let Some(line) = self.runner.next_line(&mut stream) else {
                break;
            };
            let line = line.trim_end();
            if line.is_empty() || is_spinner_frame(line) {
                continue;
            }
            on_line(target, line);
        }

        let output = self.runner.finish(stream)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
        {
            on_line(target, line);
        }

        Ok(output.status)
    }
}

fn terminate_quietly(process: &dyn RunningProcess) {
    if let Err(error) = process.terminate(ProcessTerminationMode::Graceful) {
        tracing::debug!(pid = ?process.pid(), message = %error.message, "termination request failed");
    }
}
