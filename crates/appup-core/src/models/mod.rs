pub mod batch;
pub mod candidate;
pub mod error;

pub use batch::{BatchResult, BatchTarget, ItemReport, TargetOutcome};
pub use candidate::UpgradeCandidate;
pub use error::{CoreError, CoreErrorKind, CoreResult, ToolAction};
