use crate::models::UpgradeCandidate;
use crate::models::candidate::is_unknown_version;

/// One entry of a batch, fixed when the batch starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchTarget {
    pub identifier: String,
    pub current_version: String,
}

impl BatchTarget {
    pub fn new(identifier: impl Into<String>, current_version: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            current_version: current_version.into(),
        }
    }

    pub fn has_unknown_version(&self) -> bool {
        is_unknown_version(&self.current_version)
    }
}

impl From<&UpgradeCandidate> for BatchTarget {
    fn from(candidate: &UpgradeCandidate) -> Self {
        Self::new(
            candidate.identifier.clone(),
            candidate.current_version.clone(),
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetOutcome {
    Succeeded,
    Failed { message: String },
    /// The child was stopped by a cancellation request.
    Terminated,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Context handed to `on_item_done` once a target has been processed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ItemReport<'a> {
    pub index: usize,
    pub total: usize,
    pub target: &'a BatchTarget,
    pub outcome: &'a TargetOutcome,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchResult {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
}
