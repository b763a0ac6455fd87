use serde_json::Value;

use crate::models::{CoreResult, UpgradeCandidate};
use crate::parsing::parse_error;

// Field names differ between tool versions; earlier names win unless empty.
const NAME_FIELDS: &[&str] = &["PackageName", "Name"];
const IDENTIFIER_FIELDS: &[&str] = &["PackageIdentifier", "Id"];
const AVAILABLE_FIELDS: &[&str] = &["AvailableVersion", "Available"];
const CURRENT_FIELDS: &[&str] = &["Version", "InstalledVersion"];

/// Parses JSON output in any of the shapes the tool has emitted:
/// a bare array of package records, `{"Sources": [{"Packages": [...]}]}`,
/// or `{"Packages": [...]}`.
///
/// Records without a name, identifier and available version are dropped.
/// Fails only when the text is not JSON at all.
pub fn parse_structured(output: &str) -> CoreResult<Vec<UpgradeCandidate>> {
    let document: Value = serde_json::from_str(output.trim())
        .map_err(|error| parse_error(format!("JSON parse error: {error}")))?;

    Ok(package_records(&document)
        .into_iter()
        .filter_map(candidate_from_record)
        .collect())
}

fn package_records(document: &Value) -> Vec<&Value> {
    match document {
        Value::Array(records) => records.iter().collect(),
        Value::Object(map) => {
            if let Some(sources) = map.get("Sources") {
                sources
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|source| source.get("Packages").and_then(Value::as_array))
                    .flatten()
                    .collect()
            } else {
                map.get("Packages")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .collect()
            }
        }
        _ => Vec::new(),
    }
}

fn candidate_from_record(record: &Value) -> Option<UpgradeCandidate> {
    let display_name = first_field(record, NAME_FIELDS)?;
    let identifier = first_field(record, IDENTIFIER_FIELDS)?;
    let available_version = first_field(record, AVAILABLE_FIELDS)?;
    let current_version = first_field(record, CURRENT_FIELDS).unwrap_or_default();

    UpgradeCandidate::from_fields(
        &display_name,
        &identifier,
        &current_version,
        &available_version,
    )
}

fn first_field(record: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| record.get(*name))
        .find_map(field_text)
}

fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
