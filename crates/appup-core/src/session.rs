use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::batch::{BatchCancellationToken, UpgradeBatchRunner};
use crate::config::UpdaterConfig;
use crate::discovery::{Discovery, ProcessWingetSource, WingetSource};
use crate::execution::ProcessRunner;
use crate::models::{
    BatchResult, BatchTarget, CoreError, CoreErrorKind, CoreResult, ItemReport, ToolAction,
    UpgradeCandidate,
};

/// What a call to [`Updater::run_batch`] ended up doing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchRun {
    Finished(BatchResult),
    /// Another batch was already running; it was asked to stop instead.
    CancelRequested,
}

#[derive(Debug)]
enum Activity {
    Idle,
    Discovering,
    Upgrading(BatchCancellationToken),
}

/// Discovery and upgrades behind one gate: at most one of them runs at a time.
///
/// The updater is `Sync`, so a UI thread can hold it alongside the worker that
/// runs a batch and use [`Updater::request_cancel`] to stop it.
pub struct Updater<S: WingetSource = ProcessWingetSource> {
    discovery: Discovery<S>,
    batch: UpgradeBatchRunner,
    activity: Mutex<Activity>,
}

impl Updater<ProcessWingetSource> {
    pub fn from_runner(runner: ProcessRunner, config: UpdaterConfig) -> Self {
        let source = ProcessWingetSource::new(runner.clone(), config.clone());
        Self::new(source, UpgradeBatchRunner::new(runner, config))
    }
}

impl<S: WingetSource> Updater<S> {
    pub fn new(source: S, batch: UpgradeBatchRunner) -> Self {
        Self {
            discovery: Discovery::new(source),
            batch,
            activity: Mutex::new(Activity::Idle),
        }
    }

    pub fn probe(&self) -> CoreResult<String> {
        self.discovery.probe()
    }

    /// Lists upgradable packages. Refused with `Busy` while other work runs.
    pub fn discover(&self, include_unknown: bool) -> CoreResult<Vec<UpgradeCandidate>> {
        {
            let mut activity = self.lock_activity();
            if !matches!(*activity, Activity::Idle) {
                return Err(busy(ToolAction::ListUpgrades));
            }
            *activity = Activity::Discovering;
        }
        let _idle = IdleOnDrop(&self.activity);

        self.discovery.discover(include_unknown)
    }

    /// Upgrades `targets` in order, blocking until the batch ends.
    ///
    /// Invoked while a batch is already running, this is the stop button: the
    /// running batch is cancelled and `CancelRequested` is returned at once.
    pub fn run_batch<F, L, D>(
        &self,
        targets: &[BatchTarget],
        include_unknown: bool,
        on_item_start: F,
        on_line: L,
        on_item_done: D,
    ) -> CoreResult<BatchRun>
    where
        F: FnMut(usize, &BatchTarget),
        L: FnMut(&BatchTarget, &str),
        D: FnMut(ItemReport<'_>),
    {
        let token = BatchCancellationToken::new();
        {
            let mut activity = self.lock_activity();
            match &*activity {
                Activity::Upgrading(running) => {
                    running.cancel();
                    return Ok(BatchRun::CancelRequested);
                }
                Activity::Discovering => return Err(busy(ToolAction::Upgrade)),
                Activity::Idle => {}
            }
            if targets.is_empty() {
                return Err(CoreError::for_action(
                    ToolAction::Upgrade,
                    CoreErrorKind::InvalidInput,
                    "no packages selected",
                ));
            }
            *activity = Activity::Upgrading(token.clone());
        }
        let _idle = IdleOnDrop(&self.activity);

        let result = self
            .batch
            .run_batch(
                targets,
                include_unknown,
                &token,
                on_item_start,
                on_line,
                on_item_done,
            );
        tracing::info!(
            total = result.total,
            completed = result.completed,
            failed = result.failed,
            cancelled = result.cancelled,
            "batch finished"
        );
        Ok(BatchRun::Finished(result))
    }

    /// Cancels the running batch, if any. Returns whether one was running.
    pub fn request_cancel(&self) -> bool {
        match &*self.lock_activity() {
            Activity::Upgrading(token) => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(*self.lock_activity(), Activity::Idle)
    }

    fn lock_activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct IdleOnDrop<'a>(&'a Mutex<Activity>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Activity::Idle;
    }
}

fn busy(action: ToolAction) -> CoreError {
    CoreError::for_action(
        action,
        CoreErrorKind::Busy,
        "another winget operation is already running",
    )
}
