//! Command lines for every `winget` invocation.

use std::time::Duration;

use crate::config::UpdaterConfig;
use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{BatchTarget, ToolAction};

const INCLUDE_UNKNOWN_FLAG: &str = "--include-unknown";
const SOURCE_AGREEMENT_FLAGS: [&str; 2] = ["--accept-source-agreements", "--disable-interactivity"];
const JSON_OUTPUT_FLAGS: [&str; 2] = ["--output", "json"];
const PACKAGE_AGREEMENT_FLAG: &str = "--accept-package-agreements";
const SILENT_FLAG: &str = "-h";

/// Command phrasings that may produce JSON, newest tool versions first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DiscoveryVariant {
    Upgrade,
    ListUpgradeAvailable,
    ListUpgrades,
}

pub const STRUCTURED_VARIANTS: [DiscoveryVariant; 3] = [
    DiscoveryVariant::Upgrade,
    DiscoveryVariant::ListUpgradeAvailable,
    DiscoveryVariant::ListUpgrades,
];

pub fn winget_version_request(config: &UpdaterConfig) -> ProcessSpawnRequest {
    winget_request(
        config,
        ToolAction::Probe,
        CommandSpec::new(&config.program).arg("--version"),
        config.probe_timeout,
    )
}

pub fn winget_structured_request(
    config: &UpdaterConfig,
    variant: DiscoveryVariant,
    include_unknown: bool,
) -> ProcessSpawnRequest {
    let command = match variant {
        DiscoveryVariant::Upgrade => upgrade_listing(config, include_unknown),
        DiscoveryVariant::ListUpgradeAvailable => {
            CommandSpec::new(&config.program).args(["list", "--upgrade-available"])
        }
        DiscoveryVariant::ListUpgrades => {
            CommandSpec::new(&config.program).args(["list", "--upgrades"])
        }
    }
    .args(SOURCE_AGREEMENT_FLAGS)
    .args(JSON_OUTPUT_FLAGS);

    winget_request(
        config,
        ToolAction::ListUpgrades,
        command,
        config.discovery_timeout,
    )
}

/// Plain `winget upgrade` listing, read with the table parser.
pub fn winget_table_request(config: &UpdaterConfig, include_unknown: bool) -> ProcessSpawnRequest {
    winget_request(
        config,
        ToolAction::ListUpgrades,
        upgrade_listing(config, include_unknown).args(SOURCE_AGREEMENT_FLAGS),
        config.discovery_timeout,
    )
}

/// Upgrade of a single package. Targets without a known installed version get
/// `--include-unknown`, otherwise some tool versions cannot find them.
pub fn winget_upgrade_request(
    config: &UpdaterConfig,
    target: &BatchTarget,
    include_unknown: bool,
) -> ProcessSpawnRequest {
    let mut command = CommandSpec::new(&config.program)
        .args(["upgrade", "--id"])
        .arg(target.identifier.as_str());
    if include_unknown || target.has_unknown_version() {
        command = command.arg(INCLUDE_UNKNOWN_FLAG);
    }
    command = command
        .arg(PACKAGE_AGREEMENT_FLAG)
        .args(SOURCE_AGREEMENT_FLAGS);
    if config.silent {
        command = command.arg(SILENT_FLAG);
    }

    winget_request(config, ToolAction::Upgrade, command, config.upgrade_timeout)
}

fn upgrade_listing(config: &UpdaterConfig, include_unknown: bool) -> CommandSpec {
    let command = CommandSpec::new(&config.program).arg("upgrade");
    if include_unknown {
        command.arg(INCLUDE_UNKNOWN_FLAG)
    } else {
        command
    }
}

fn winget_request(
    config: &UpdaterConfig,
    action: ToolAction,
    command: CommandSpec,
    timeout: Option<Duration>,
) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(action, command.envs(&config.environment)).maybe_timeout(timeout)
}
