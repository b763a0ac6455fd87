use crate::config::UpdaterConfig;
use crate::execution::{CommandOutcome, ProcessRunner};
use crate::models::{CoreError, CoreErrorKind, CoreResult, ToolAction, UpgradeCandidate};
use crate::parsing::{TableParse, parse_structured, parse_table, reports_no_updates};
use crate::winget::{
    DiscoveryVariant, STRUCTURED_VARIANTS, winget_structured_request, winget_table_request,
    winget_version_request,
};

const TOOL_NOT_FOUND_MESSAGE: &str =
    "winget not found. Install the App Installer from Microsoft Store.";
const NO_JSON_MESSAGE: &str = "Failed to get JSON from winget.";

/// Raw invocations of the tool. Implementations report non-zero exits in the
/// outcome and reserve `Err` for failures to run the tool at all.
pub trait WingetSource: Send + Sync {
    fn probe(&self) -> CoreResult<CommandOutcome>;

    fn list_structured(
        &self,
        variant: DiscoveryVariant,
        include_unknown: bool,
    ) -> CoreResult<CommandOutcome>;

    fn list_table(&self, include_unknown: bool) -> CoreResult<CommandOutcome>;
}

pub struct ProcessWingetSource {
    runner: ProcessRunner,
    config: UpdaterConfig,
}

impl ProcessWingetSource {
    pub fn new(runner: ProcessRunner, config: UpdaterConfig) -> Self {
        Self { runner, config }
    }
}

impl WingetSource for ProcessWingetSource {
    fn probe(&self) -> CoreResult<CommandOutcome> {
        self.runner.run(winget_version_request(&self.config))
    }

    fn list_structured(
        &self,
        variant: DiscoveryVariant,
        include_unknown: bool,
    ) -> CoreResult<CommandOutcome> {
        self.runner.run(winget_structured_request(
            &self.config,
            variant,
            include_unknown,
        ))
    }

    fn list_table(&self, include_unknown: bool) -> CoreResult<CommandOutcome> {
        self.runner
            .run(winget_table_request(&self.config, include_unknown))
    }
}

/// Finds upgradable packages, tolerating differences between tool versions.
///
/// Each structured variant is tried in order until one exits cleanly with
/// parseable JSON; the plain table listing is the last resort. Nothing is
/// retried: the same command against the same tool gives the same answer.
pub struct Discovery<S: WingetSource> {
    source: S,
}

impl<S: WingetSource> Discovery<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Returns the tool's version string, or `ToolNotFound`.
    pub fn probe(&self) -> CoreResult<String> {
        let outcome = match self.source.probe() {
            Ok(outcome) if outcome.success() => outcome,
            Ok(outcome) => {
                tracing::warn!(
                    exit_code = ?outcome.exit_code(),
                    stderr = %outcome.stderr,
                    "winget version probe failed"
                );
                return Err(tool_not_found());
            }
            Err(error) => {
                tracing::warn!(
                    kind = ?error.kind,
                    message = %error.message,
                    "winget version probe could not run"
                );
                return Err(tool_not_found());
            }
        };

        Ok(outcome
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string())
    }

    pub fn discover(&self, include_unknown: bool) -> CoreResult<Vec<UpgradeCandidate>> {
        self.probe()?;

        let structured_error = match self.discover_structured(include_unknown) {
            Ok(candidates) => return Ok(candidates),
            Err(message) => message,
        };

        let outcome = self
            .source
            .list_table(include_unknown)
            .map_err(|error| discovery_failed(error.message))?;
        if !outcome.success() {
            return Err(discovery_failed(first_non_empty(
                &outcome.stderr,
                &structured_error,
            )));
        }

        match parse_table(&outcome.stdout) {
            TableParse::Rows(candidates) if !candidates.is_empty() => {
                tracing::info!(
                    count = candidates.len(),
                    "discovered upgrades from table output"
                );
                Ok(candidates)
            }
            TableParse::NoApplicableUpdates => Ok(Vec::new()),
            TableParse::NoTable if reports_no_updates(&outcome.stdout) => Ok(Vec::new()),
            _ => Err(discovery_failed(structured_error)),
        }
    }

    /// Walks the structured variants; on failure returns the diagnostic of the
    /// last attempt.
    fn discover_structured(&self, include_unknown: bool) -> Result<Vec<UpgradeCandidate>, String> {
        let mut last_error = String::new();

        for variant in STRUCTURED_VARIANTS {
            let outcome = match self.source.list_structured(variant, include_unknown) {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(variant = ?variant, message = %error.message, "variant could not run");
                    last_error = error.message;
                    continue;
                }
            };

            if !outcome.success() || outcome.stdout.trim().is_empty() {
                let fallback = match outcome.exit_code() {
                    Some(0) => "winget returned no output.".to_string(),
                    Some(code) => format!("winget returned a non-zero exit code ({code})."),
                    None => "winget was terminated.".to_string(),
                };
                last_error = first_non_empty(&outcome.stderr, &fallback);
                tracing::warn!(variant = ?variant, message = %last_error, "variant failed");
                continue;
            }

            match parse_structured(&outcome.stdout) {
                Ok(candidates) => {
                    tracing::info!(
                        variant = ?variant,
                        count = candidates.len(),
                        "discovered upgrades from JSON output"
                    );
                    return Ok(candidates);
                }
                Err(error) => {
                    last_error = format!("{}\n{}", outcome.stderr, error.message)
                        .trim()
                        .to_string();
                    tracing::warn!(variant = ?variant, message = %last_error, "variant output was not JSON");
                }
            }
        }

        Err(first_non_empty(&last_error, NO_JSON_MESSAGE))
    }
}

fn first_non_empty(preferred: &str, fallback: &str) -> String {
    let preferred = preferred.trim();
    if preferred.is_empty() {
        fallback.trim().to_string()
    } else {
        preferred.to_string()
    }
}

fn tool_not_found() -> CoreError {
    CoreError::for_action(
        ToolAction::Probe,
        CoreErrorKind::ToolNotFound,
        TOOL_NOT_FOUND_MESSAGE,
    )
}

fn discovery_failed(message: impl Into<String>) -> CoreError {
    CoreError::for_action(
        ToolAction::ListUpgrades,
        CoreErrorKind::DiscoveryFailed,
        message,
    )
}
