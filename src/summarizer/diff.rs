//! Typed infrastructure diff document.
//!
//! The document maps stack names to stack-level flags and a map of resource
//! changes. Flags are read with JSON truthiness so `1`, `"yes"` or a non-empty
//! object all count as set; unknown fields are ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, warn};

// == Diff Document ==
/// Parsed diff with stacks sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffDocument {
    #[serde(default)]
    pub stacks: BTreeMap<String, StackDiff>,
}

/// Changes to one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackDiff {
    #[serde(default, deserialize_with = "truthy")]
    pub create: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub update: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub destroy: bool,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDiff>,
}

/// Changes to one resource within a stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    pub create: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub update: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub destroy: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub replace: bool,
}

/// Kind of change on a stack or resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Destroy,
    Replace,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            ChangeKind::Create => "created",
            ChangeKind::Update => "updated",
            ChangeKind::Destroy => "destroyed",
            ChangeKind::Replace => "replaced",
        };
        f.write_str(verb)
    }
}

impl StackDiff {
    fn stack_changes(&self) -> impl Iterator<Item = ChangeKind> {
        [
            (self.create, ChangeKind::Create),
            (self.update, ChangeKind::Update),
            (self.destroy, ChangeKind::Destroy),
        ]
        .into_iter()
        .filter_map(|(set, kind)| set.then_some(kind))
    }
}

impl ResourceDiff {
    fn changes(&self) -> impl Iterator<Item = ChangeKind> {
        [
            (self.create, ChangeKind::Create),
            (self.update, ChangeKind::Update),
            (self.destroy, ChangeKind::Destroy),
            (self.replace, ChangeKind::Replace),
        ]
        .into_iter()
        .filter_map(|(set, kind)| set.then_some(kind))
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }
}

impl DiffDocument {
    /// Parses a diff from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    // == Has Changes ==
    /// True if any stack or resource carries a change flag.
    pub fn has_changes(&self) -> bool {
        self.stacks.values().any(|stack| {
            stack.stack_changes().next().is_some()
                || stack.resources.values().any(ResourceDiff::has_changes)
        })
    }

    /// Number of resources with at least one change flag.
    pub fn changed_resource_count(&self) -> usize {
        self.stacks
            .values()
            .flat_map(|stack| stack.resources.values())
            .filter(|resource| resource.has_changes())
            .count()
    }

    // == Change Lines ==
    /// One human-readable line per change, in stack then resource order.
    pub fn change_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (stack_name, stack) in &self.stacks {
            for kind in stack.stack_changes() {
                lines.push(format!("Stack '{}' will be {}", stack_name, kind));
            }
            for (resource_id, resource) in &stack.resources {
                let resource_type = resource.resource_type.as_deref().unwrap_or("Unknown");
                for kind in resource.changes() {
                    lines.push(format!(
                        "Resource '{}' ({}) will be {} in stack '{}'",
                        resource_id, resource_type, kind, stack_name
                    ));
                }
            }
        }
        lines
    }
}

// == Load Diff ==
/// Reads a diff file, falling back to an empty document.
///
/// A missing, empty or malformed file is logged and yields a diff with no
/// stacks, which the pipeline reports as "no changes".
pub fn load_diff(path: &Path) -> DiffDocument {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Diff file not found: {}", path.display());
            return DiffDocument::default();
        }
        Err(e) => {
            error!("Failed to read diff file {}: {}", path.display(), e);
            return DiffDocument::default();
        }
    };

    if content.trim().is_empty() {
        warn!("Diff file is empty: {}", path.display());
        return DiffDocument::default();
    }

    match DiffDocument::from_json_str(&content) {
        Ok(diff) => diff,
        Err(e) => {
            error!("Failed to parse diff file {}: {}", path.display(), e);
            DiffDocument::default()
        }
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "stacks": {
            "ApiStack": {
                "update": true,
                "resources": {
                    "Handler": {"type": "AWS::Lambda::Function", "update": true},
                    "Table": {"type": "AWS::DynamoDB::Table", "replace": 1},
                    "Role": {"type": "AWS::IAM::Role"}
                }
            },
            "EmptyStack": {}
        },
        "generatedBy": "cdk"
    }"#;

    #[test]
    fn test_parse_sample_diff() {
        let diff = DiffDocument::from_json_str(SAMPLE).unwrap();
        assert_eq!(diff.stacks.len(), 2);
        let api = &diff.stacks["ApiStack"];
        assert!(api.update);
        assert!(!api.create);
        assert!(api.resources["Table"].replace);
        assert_eq!(
            api.resources["Handler"].resource_type.as_deref(),
            Some("AWS::Lambda::Function")
        );
    }

    #[test]
    fn test_has_changes() {
        let diff = DiffDocument::from_json_str(SAMPLE).unwrap();
        assert!(diff.has_changes());
        assert_eq!(diff.changed_resource_count(), 2);

        let quiet = DiffDocument::from_json_str(
            r#"{"stacks": {"A": {"resources": {"R": {"type": "T", "update": false}}}}}"#,
        )
        .unwrap();
        assert!(!quiet.has_changes());
        assert!(!DiffDocument::default().has_changes());
    }

    #[test]
    fn test_resource_change_alone_counts() {
        let diff = DiffDocument::from_json_str(
            r#"{"stacks": {"A": {"resources": {"R": {"destroy": "yes"}}}}}"#,
        )
        .unwrap();
        assert!(diff.has_changes());
    }

    #[test]
    fn test_change_lines() {
        let diff = DiffDocument::from_json_str(SAMPLE).unwrap();
        assert_eq!(
            diff.change_lines(),
            vec![
                "Stack 'ApiStack' will be updated".to_string(),
                "Resource 'Handler' (AWS::Lambda::Function) will be updated in stack 'ApiStack'"
                    .to_string(),
                "Resource 'Table' (AWS::DynamoDB::Table) will be replaced in stack 'ApiStack'"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_type_is_unknown() {
        let diff =
            DiffDocument::from_json_str(r#"{"stacks": {"S": {"resources": {"R": {"create": true}}}}}"#)
                .unwrap();
        assert_eq!(
            diff.change_lines(),
            vec!["Resource 'R' (Unknown) will be created in stack 'S'".to_string()]
        );
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let diff = load_diff(&tmp.path().join("absent.json"));
        assert_eq!(diff, DiffDocument::default());
    }

    #[test]
    fn test_load_empty_and_invalid_files_are_empty() {
        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "   ").unwrap();
        assert!(load_diff(empty.path()).stacks.is_empty());

        let mut invalid = tempfile::NamedTempFile::new().unwrap();
        write!(invalid, "{{not json").unwrap();
        assert!(load_diff(invalid.path()).stacks.is_empty());
    }

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();
        let diff = load_diff(file.path());
        assert!(diff.has_changes());
    }
}
