mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use appup_core::execution::{ProcessRunner, TokioProcessExecutor};
use appup_core::models::{CoreResult, TargetOutcome};
use appup_core::{BatchRun, CandidateBoard, UpdaterConfig, Updater};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::render::BatchProgress;

const LOG_ENV: &str = "APPUP_LOG";

#[derive(Parser, Debug)]
#[command(name = "appup")]
#[command(about = "Checks for and installs application updates with winget", long_about = None)]
struct Cli {
    /// Path to the winget executable.
    #[arg(long, global = true)]
    winget: Option<PathBuf>,
    /// Also list packages whose installed version winget cannot determine.
    #[arg(long, global = true)]
    include_unknown: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Check {
        #[arg(long)]
        json: bool,
    },
    Upgrade {
        #[arg(long, conflicts_with = "ids")]
        all: bool,
        #[arg(long = "id", value_name = "ID")]
        ids: Vec<String>,
    },
    Doctor,
}

enum BatchEvent {
    ItemStarted(String),
    Line(String),
    ItemDone {
        identifier: String,
        outcome: TargetOutcome,
    },
    Finished(CoreResult<BatchRun>),
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = UpdaterConfig::from_env().context("invalid APPUP_* setting")?;
    if let Some(program) = cli.winget {
        config = config.with_program(program);
    }
    if cli.include_unknown {
        config = config.with_include_unknown(true);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let runner = ProcessRunner::new(Arc::new(TokioProcessExecutor), runtime.handle().clone());
    let include_unknown = config.include_unknown;
    let program = config.program.clone();
    let updater = Arc::new(Updater::from_runner(runner, config));

    match cli.command {
        Commands::Check { json } => check(&updater, include_unknown, json),
        Commands::Upgrade { all, ids } => {
            upgrade(&runtime, updater, include_unknown, all, &ids)
        }
        Commands::Doctor => {
            let version = updater.probe().map_err(|error| anyhow!(error.message))?;
            println!("winget: {}", program.display());
            println!("version: {version}");
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn discover_board(updater: &Updater, include_unknown: bool) -> Result<CandidateBoard> {
    let candidates = updater
        .discover(include_unknown)
        .map_err(|error| anyhow!(error.message))?;
    let mut board = CandidateBoard::new();
    board.replace(candidates);
    Ok(board)
}

fn check(updater: &Updater, include_unknown: bool, json: bool) -> Result<()> {
    let board = discover_board(updater, include_unknown)?;

    if json {
        println!("{}", serde_json::to_string_pretty(board.candidates())?);
    } else if board.is_empty() {
        println!("No apps need updating.");
    } else {
        render::print_candidates(board.candidates(), board.count());
    }
    Ok(())
}

fn upgrade(
    runtime: &tokio::runtime::Runtime,
    updater: Arc<Updater>,
    include_unknown: bool,
    all: bool,
    ids: &[String],
) -> Result<()> {
    let mut board = discover_board(&updater, include_unknown)?;
    if board.is_empty() {
        println!("No apps need updating.");
        return Ok(());
    }

    if all {
        board.selection_mut().select_all();
    } else {
        for id in ids {
            if !board.selection().contains(id) {
                eprintln!("{id}: no update available, skipping");
            }
        }
        board
            .selection_mut()
            .select_many(ids.iter().map(String::as_str));
    }
    let targets = board.selected_targets();
    if targets.is_empty() {
        bail!("no packages selected");
    }

    let canceller = Arc::clone(&updater);
    runtime.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if canceller.request_cancel() {
                tracing::info!("cancellation requested from terminal");
            }
        }
    });

    let (events, received) = mpsc::channel();
    let worker = {
        let updater = Arc::clone(&updater);
        let targets = targets.clone();
        thread::Builder::new()
            .name("appup-batch".to_string())
            .spawn(move || {
                let start_events = events.clone();
                let line_events = events.clone();
                let done_events = events.clone();
                let run = updater.run_batch(
                    &targets,
                    include_unknown,
                    move |_, target| {
                        let _ = start_events
                            .send(BatchEvent::ItemStarted(target.identifier.clone()));
                    },
                    move |target, line| {
                        let _ = line_events
                            .send(BatchEvent::Line(format!("[{}] {line}", target.identifier)));
                    },
                    move |report| {
                        let _ = done_events.send(BatchEvent::ItemDone {
                            identifier: report.target.identifier.clone(),
                            outcome: report.outcome.clone(),
                        });
                    },
                );
                let _ = events.send(BatchEvent::Finished(run));
            })
            .context("failed to start upgrade worker")?
    };

    let mut progress = BatchProgress::start(targets.len());
    progress.println(&render::batch_started(targets.len()));
    let mut finished = None;
    for event in received {
        match event {
            BatchEvent::ItemStarted(identifier) => {
                progress.println(&render::item_started(&identifier));
            }
            BatchEvent::Line(line) => progress.println(&line),
            BatchEvent::ItemDone {
                identifier,
                outcome,
            } => {
                if let TargetOutcome::Failed { message } = &outcome {
                    progress.println(&format!("[{identifier}] failed: {message}"));
                }
                progress.println(&render::item_finished(&identifier));
                progress.item_done();
            }
            BatchEvent::Finished(run) => finished = Some(run),
        }
    }
    worker
        .join()
        .map_err(|_| anyhow!("upgrade worker panicked"))?;

    match finished {
        Some(Ok(BatchRun::Finished(result))) if result.cancelled => {
            progress.finish_canceled();
            println!("Cancelled.");
        }
        Some(Ok(BatchRun::Finished(result))) => {
            progress.finish_done();
            println!("All selected updates completed.");
            if result.failed > 0 {
                eprintln!("{} of {} updates failed.", result.failed, result.total);
            }
        }
        Some(Ok(BatchRun::CancelRequested)) => {
            progress.finish_canceled();
            println!("Cancelled.");
        }
        Some(Err(error)) => {
            progress.finish_canceled();
            return Err(anyhow!(error.message));
        }
        None => return Err(anyhow!("upgrade worker stopped without a result")),
    }

    Ok(())
}
