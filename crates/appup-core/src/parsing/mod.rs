//! Conversion of raw tool output into [`UpgradeCandidate`](crate::models::UpgradeCandidate)
//! lists.
//!
//! The two strategies are independent; [`crate::discovery::Discovery`] decides
//! which one to try and in what order.

pub mod structured;
pub mod tabular;

pub use structured::parse_structured;
pub use tabular::{TableParse, parse_table, reports_no_updates};

use crate::models::{CoreError, CoreErrorKind, ToolAction};

pub(crate) fn parse_error(message: impl Into<String>) -> CoreError {
    CoreError::for_action(
        ToolAction::ListUpgrades,
        CoreErrorKind::ParseFailure,
        message,
    )
}
