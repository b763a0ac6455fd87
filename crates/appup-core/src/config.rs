use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind, CoreResult};

pub const PROGRAM_ENV: &str = "APPUP_WINGET";
pub const INCLUDE_UNKNOWN_ENV: &str = "APPUP_INCLUDE_UNKNOWN";
pub const SILENT_ENV: &str = "APPUP_SILENT";
pub const UPGRADE_TIMEOUT_ENV: &str = "APPUP_UPGRADE_TIMEOUT_SECS";

const DEFAULT_PROGRAM: &str = "winget";
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpdaterConfig {
    pub program: PathBuf,
    /// Applied to every child. Forces English output so parsing does not
    /// depend on the user's locale.
    pub environment: BTreeMap<String, String>,
    pub include_unknown: bool,
    /// Pass the tool's hide-UI flag to upgrades.
    pub silent: bool,
    pub probe_timeout: Option<Duration>,
    pub discovery_timeout: Option<Duration>,
    pub upgrade_timeout: Option<Duration>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let mut environment = BTreeMap::new();
        environment.insert("DOTNET_CLI_UI_LANGUAGE".to_string(), "en".to_string());

        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            environment,
            include_unknown: false,
            silent: true,
            probe_timeout: Some(PROBE_TIMEOUT),
            discovery_timeout: Some(DISCOVERY_TIMEOUT),
            upgrade_timeout: None,
        }
    }
}

impl UpdaterConfig {
    /// Defaults overridden by `APPUP_*` environment variables.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let mut config = Self::default();

        if let Some(program) = lookup(PROGRAM_ENV).filter(|value| !value.trim().is_empty()) {
            config.program = PathBuf::from(program.trim());
        }
        if let Some(value) = lookup(INCLUDE_UNKNOWN_ENV) {
            config.include_unknown = parse_flag(INCLUDE_UNKNOWN_ENV, &value)?;
        }
        if let Some(value) = lookup(SILENT_ENV) {
            config.silent = parse_flag(SILENT_ENV, &value)?;
        }
        if let Some(value) = lookup(UPGRADE_TIMEOUT_ENV) {
            let seconds: u64 = value.trim().parse().map_err(|_| {
                invalid_setting(UPGRADE_TIMEOUT_ENV, &value, "expected whole seconds")
            })?;
            config.upgrade_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        Ok(config)
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_include_unknown(mut self, include_unknown: bool) -> Self {
        self.include_unknown = include_unknown;
        self
    }
}

fn parse_flag(key: &str, value: &str) -> CoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid_setting(key, value, "expected a boolean")),
    }
}

fn invalid_setting(key: &str, value: &str, expected: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("invalid value '{value}' for {key}: {expected}"),
    )
}
