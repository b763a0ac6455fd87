pub mod batch;
pub mod config;
pub mod discovery;
pub mod execution;
pub mod models;
pub mod parsing;
pub mod selection;
pub mod session;
pub mod winget;

pub use batch::{BatchCancellationToken, UpgradeBatchRunner};
pub use config::UpdaterConfig;
pub use discovery::{Discovery, ProcessWingetSource, WingetSource};
pub use selection::{CandidateBoard, SelectionCount, SelectionStore};
pub use session::{BatchRun, Updater};
