use serde::Serialize;

/// One package the tool reports as having a newer version available.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct UpgradeCandidate {
    pub display_name: String,
    pub identifier: String,
    pub current_version: String,
    pub available_version: String,
}

impl UpgradeCandidate {
    /// Builds a candidate from raw fields, returning `None` unless name, id and
    /// available version are all non-empty after trimming.
    pub fn from_fields(
        display_name: &str,
        identifier: &str,
        current_version: &str,
        available_version: &str,
    ) -> Option<Self> {
        let candidate = Self {
            display_name: display_name.trim().to_string(),
            identifier: identifier.trim().to_string(),
            current_version: current_version.trim().to_string(),
            available_version: available_version.trim().to_string(),
        };
        candidate.is_valid().then_some(candidate)
    }

    pub fn is_valid(&self) -> bool {
        !self.display_name.is_empty()
            && !self.identifier.is_empty()
            && !self.available_version.is_empty()
    }

    /// The installed version is empty or reported literally as "Unknown".
    pub fn has_unknown_version(&self) -> bool {
        is_unknown_version(&self.current_version)
    }
}

pub(crate) fn is_unknown_version(version: &str) -> bool {
    let version = version.trim();
    version.is_empty() || version.eq_ignore_ascii_case("unknown")
}
