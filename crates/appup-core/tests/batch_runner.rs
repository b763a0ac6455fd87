use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use appup_core::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessRunner,
    ProcessSpawnRequest, ProcessStream, ProcessTerminationMode, ProcessWaitFuture, RunningProcess,
};
use appup_core::models::{BatchTarget, CoreError, CoreErrorKind, TargetOutcome};
use appup_core::{BatchCancellationToken, BatchRun, UpdaterConfig, Updater, UpgradeBatchRunner};
use tokio::sync::Notify;

#[derive(Clone, Default)]
struct Script {
    lines: Vec<&'static str>,
    stderr: &'static str,
    exit_code: i32,
    hang_until_terminated: bool,
    spawn_error: Option<&'static str>,
}

impl Script {
    fn ok(lines: &[&'static str]) -> Self {
        Self {
            lines: lines.to_vec(),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct ScriptedExecutor {
    scripts: HashMap<&'static str, Script>,
    spawned: Mutex<Vec<Vec<String>>>,
    terminated: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    fn with(mut self, identifier: &'static str, script: Script) -> Self {
        self.scripts.insert(identifier, script);
        self
    }

    fn spawned_ids(&self) -> Vec<String> {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .map(|args| args[2].clone())
            .collect()
    }

    fn spawned_args(&self) -> Vec<Vec<String>> {
        self.spawned.lock().unwrap().clone()
    }
}

impl ProcessExecutor for ScriptedExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Arc<dyn RunningProcess>> {
        let args = request.command.args.clone();
        assert_eq!(&args[..2], ["upgrade", "--id"]);
        self.spawned.lock().unwrap().push(args.clone());

        let script = self
            .scripts
            .get(args[2].as_str())
            .cloned()
            .unwrap_or_default();
        if let Some(message) = script.spawn_error {
            return Err(CoreError::new(CoreErrorKind::ProcessFailure, message));
        }

        Ok(Arc::new(ScriptedProcess {
            identifier: args[2].clone(),
            script,
            kill: Arc::new(Notify::new()),
            terminated: self.terminated.clone(),
        }))
    }
}

struct ScriptedProcess {
    identifier: String,
    script: Script,
    kill: Arc<Notify>,
    terminated: Arc<Mutex<Vec<String>>>,
}

impl RunningProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn terminate(&self, _mode: ProcessTerminationMode) -> ExecutionResult<()> {
        self.terminated.lock().unwrap().push(self.identifier.clone());
        self.kill.notify_one();
        Ok(())
    }

    fn wait(&self) -> ProcessWaitFuture {
        Box::pin(async { Err(CoreError::new(CoreErrorKind::ProcessFailure, "not scripted")) })
    }

    fn stream(&self) -> ExecutionResult<ProcessStream> {
        let (sender, stdout_lines) = tokio::sync::mpsc::unbounded_channel();
        for line in &self.script.lines {
            let _ = sender.send(line.to_string());
        }

        let script = self.script.clone();
        let kill = self.kill.clone();
        let task = tokio::spawn(async move {
            let status = if script.hang_until_terminated {
                kill.notified().await;
                ProcessExitStatus::Terminated
            } else {
                ProcessExitStatus::ExitCode(script.exit_code)
            };
            drop(sender);
            let now = SystemTime::now();
            ProcessOutput {
                status,
                stdout: Vec::new(),
                stderr: script.stderr.as_bytes().to_vec(),
                started_at: now,
                finished_at: now,
            }
        });

        Ok(ProcessStream {
            stdout_lines,
            completion: Box::pin(async move {
                task.await
                    .map_err(|error| CoreError::new(CoreErrorKind::ProcessFailure, error.to_string()))
            }),
        })
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn batch_runner(
    runtime: &tokio::runtime::Runtime,
    executor: Arc<ScriptedExecutor>,
) -> UpgradeBatchRunner {
    UpgradeBatchRunner::new(
        ProcessRunner::new(executor, runtime.handle().clone()),
        UpdaterConfig::default(),
    )
}

fn targets(ids: &[&str]) -> Vec<BatchTarget> {
    ids.iter().map(|id| BatchTarget::new(*id, "1.0")).collect()
}

#[test]
fn runs_targets_in_order_and_filters_spinner_frames() {
    let runtime = runtime();
    let executor = Arc::new(
        ScriptedExecutor::default()
            .with("P1", Script::ok(&["Found P1", "-", "\\", "  |  ", "", "Installed P1"]))
            .with(
                "P2",
                Script {
                    stderr: "note from stderr\n\n",
                    ..Script::ok(&["/", "Installed P2   "])
                },
            )
            .with("P3", Script::ok(&[])),
    );
    let runner = batch_runner(&runtime, executor.clone());
    let token = BatchCancellationToken::new();
    let events = RefCell::new(Vec::new());

    let result = runner.run_batch(
        &targets(&["P1", "P2", "P3"]),
        false,
        &token,
        |index, target| {
            events
                .borrow_mut()
                .push(format!("start {} {}", target.identifier, index + 1))
        },
        |target, line| {
            events
                .borrow_mut()
                .push(format!("line {}|{line}", target.identifier))
        },
        |report| {
            assert_eq!(*report.outcome, TargetOutcome::Succeeded);
            events.borrow_mut().push(format!(
                "done {} {}/{}",
                report.target.identifier,
                report.index + 1,
                report.total
            ))
        },
    );

    assert_eq!(executor.spawned_ids(), vec!["P1", "P2", "P3"]);
    assert_eq!(
        events.into_inner(),
        vec![
            "start P1 1",
            "line P1|Found P1",
            "line P1|Installed P1",
            "done P1 1/3",
            "start P2 2",
            "line P2|Installed P2",
            "line P2|note from stderr",
            "done P2 2/3",
            "start P3 3",
            "done P3 3/3",
        ]
    );
    assert_eq!(result.total, 3);
    assert_eq!(result.completed, 3);
    assert_eq!(result.failed, 0);
    assert!(!result.cancelled);
}

#[test]
fn failing_targets_do_not_stop_the_batch() {
    let runtime = runtime();
    let executor = Arc::new(
        ScriptedExecutor::default()
            .with(
                "P1",
                Script {
                    exit_code: -1978335189,
                    ..Script::ok(&["No applicable update found."])
                },
            )
            .with(
                "P2",
                Script {
                    spawn_error: Some("failed to spawn process: access denied"),
                    ..Script::default()
                },
            )
            .with("P3", Script::ok(&["Successfully installed"])),
    );
    let runner = batch_runner(&runtime, executor.clone());
    let mut lines = Vec::new();
    let mut outcomes = Vec::new();

    let result = runner.run_batch(
        &targets(&["P1", "P2", "P3"]),
        false,
        &BatchCancellationToken::new(),
        |_, _| {},
        |_, line| lines.push(line.to_string()),
        |report| outcomes.push(report.outcome.clone()),
    );

    assert_eq!(
        outcomes,
        vec![
            TargetOutcome::Failed {
                message: "winget exited with code -1978335189".to_string()
            },
            TargetOutcome::Failed {
                message: "failed to spawn process: access denied".to_string()
            },
            TargetOutcome::Succeeded,
        ]
    );
    assert!(lines.contains(&"Error: failed to spawn process: access denied".to_string()));
    assert_eq!(result.completed, 3);
    assert_eq!(result.failed, 2);
}

#[test]
fn cancel_between_targets_never_starts_the_next_one() {
    let runtime = runtime();
    let executor = Arc::new(ScriptedExecutor::default());
    let runner = batch_runner(&runtime, executor.clone());
    let token = BatchCancellationToken::new();
    let mut done = Vec::new();

    let result = runner.run_batch(
        &targets(&["P1", "P2", "P3"]),
        false,
        &token,
        |_, _| {},
        |_, _| {},
        |report| {
            done.push(report.target.identifier.clone());
            token.cancel();
        },
    );

    assert_eq!(executor.spawned_ids(), vec!["P1"]);
    assert_eq!(done, vec!["P1"]);
    assert_eq!(result.completed, 1);
    assert!(result.cancelled);
}

#[test]
fn cancel_during_a_target_terminates_it_and_stops_the_batch() {
    let runtime = runtime();
    let executor = Arc::new(
        ScriptedExecutor::default()
            .with("P1", Script::ok(&["Installed P1"]))
            .with(
                "P2",
                Script {
                    hang_until_terminated: true,
                    ..Script::ok(&["Downloading P2"])
                },
            ),
    );
    let runner = batch_runner(&runtime, executor.clone());
    let token = BatchCancellationToken::new();
    let mut outcomes = Vec::new();

    let result = runner.run_batch(
        &targets(&["P1", "P2", "P3"]),
        false,
        &token,
        |_, _| {},
        |target, _| {
            if target.identifier == "P2" {
                token.cancel();
            }
        },
        |report| outcomes.push(report.outcome.clone()),
    );

    assert_eq!(executor.spawned_ids(), vec!["P1", "P2"]);
    assert!(executor.terminated.lock().unwrap().iter().all(|id| id == "P2"));
    assert!(!executor.terminated.lock().unwrap().is_empty());
    assert_eq!(
        outcomes,
        vec![TargetOutcome::Succeeded, TargetOutcome::Terminated]
    );
    assert_eq!(result.completed, 2);
    assert_eq!(result.failed, 0);
    assert!(result.cancelled);
}

#[test]
fn unknown_versions_are_upgraded_with_include_unknown() {
    let runtime = runtime();
    let executor = Arc::new(ScriptedExecutor::default());
    let runner = batch_runner(&runtime, executor.clone());

    runner.run_batch(
        &[
            BatchTarget::new("Known.App", "3.1"),
            BatchTarget::new("Store.App", "Unknown"),
        ],
        false,
        &BatchCancellationToken::new(),
        |_, _| {},
        |_, _| {},
        |_| {},
    );

    let args = executor.spawned_args();
    assert!(!args[0].contains(&"--include-unknown".to_string()));
    assert!(args[1].contains(&"--include-unknown".to_string()));
}

#[test]
fn second_trigger_while_running_cancels_the_batch() {
    let runtime = runtime();
    let executor = Arc::new(ScriptedExecutor::default().with(
        "P1",
        Script {
            hang_until_terminated: true,
            ..Script::ok(&["Downloading P1"])
        },
    ));
    let runner = ProcessRunner::new(executor.clone(), runtime.handle().clone());
    let updater = Arc::new(Updater::from_runner(runner, UpdaterConfig::default()));

    let (started, started_signal) = mpsc::channel();
    let worker = {
        let updater = updater.clone();
        thread::spawn(move || {
            updater.run_batch(
                &targets(&["P1", "P2"]),
                false,
                |_, _| {},
                move |_, line| {
                    let _ = started.send(line.to_string());
                },
                |_| {},
            )
        })
    };

    let first_line = started_signal
        .recv_timeout(Duration::from_secs(5))
        .expect("batch should start streaming");
    assert_eq!(first_line, "Downloading P1");
    assert!(updater.is_busy());

    let retrigger = updater
        .run_batch(&targets(&["P9"]), false, |_, _| {}, |_, _| {}, |_| {})
        .unwrap();
    assert_eq!(retrigger, BatchRun::CancelRequested);

    let run = worker.join().unwrap().unwrap();
    let BatchRun::Finished(result) = run else {
        panic!("worker should finish its batch, got {run:?}");
    };
    assert!(result.cancelled);
    assert_eq!(result.completed, 1);
    assert_eq!(executor.spawned_ids(), vec!["P1"]);
    assert!(!updater.is_busy());
    assert!(!updater.request_cancel());
}
