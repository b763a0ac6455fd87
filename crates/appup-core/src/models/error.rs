use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Which kind of tool invocation an error is attributed to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ToolAction {
    Probe,
    ListUpgrades,
    Upgrade,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    ToolNotFound,
    DiscoveryFailed,
    ParseFailure,
    InvalidInput,
    Timeout,
    ProcessFailure,
    Busy,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub action: Option<ToolAction>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            action: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_action(action: ToolAction, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            action: Some(action),
            kind,
            message: message.into(),
        }
    }
}
