//! Template Diff Engine
//!
//! Compares a freshly rendered template against the one in an existing
//! cloud assembly and reports per-resource changes.
//!
//! ## Features
//!
//! - Added, removed and modified resources
//! - Output changes
//! - Line diffs of modified resources
//! - Human-readable summaries

use serde::Serialize;
use serde_json::{Map, Value};
use similar::{ChangeTag, TextDiff};

/// Type of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Declared now, absent before
    Added,
    /// Present before, no longer declared
    Removed,
    /// Declared in both with different content
    Modified,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Added => write!(f, "+"),
            ChangeType::Removed => write!(f, "-"),
            ChangeType::Modified => write!(f, "~"),
        }
    }
}

/// A change to one resource or output.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    /// Logical id or output id
    pub id: String,
    /// Resource type, empty for outputs
    pub resource_type: String,
    pub change_type: ChangeType,
    /// Line diff of the pretty JSON, for modifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_diff: Option<String>,
}

/// Changes for a single stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackDiff {
    pub stack: String,
    /// True when no previous template existed
    pub new_stack: bool,
    pub resources: Vec<Change>,
    pub outputs: Vec<Change>,
}

impl StackDiff {
    /// Compares `old` (if any) with `new`. Both are template documents.
    pub fn compute(stack: impl Into<String>, old: Option<&Value>, new: &Value) -> Self {
        let empty = Map::new();
        let old_resources = old.and_then(|t| t["Resources"].as_object()).unwrap_or(&empty);
        let new_resources = new["Resources"].as_object().unwrap_or(&empty);
        let old_outputs = old.and_then(|t| t["Outputs"].as_object()).unwrap_or(&empty);
        let new_outputs = new["Outputs"].as_object().unwrap_or(&empty);

        Self {
            stack: stack.into(),
            new_stack: old.is_none(),
            resources: diff_sections(old_resources, new_resources, true),
            outputs: diff_sections(old_outputs, new_outputs, false),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.resources.is_empty() || !self.outputs.is_empty()
    }

    fn count(&self, change_type: ChangeType) -> usize {
        self.resources
            .iter()
            .filter(|c| c.change_type == change_type)
            .count()
    }

    /// One line summary.
    pub fn summary_text(&self) -> String {
        if !self.has_changes() {
            return "No changes detected".to_string();
        }

        let mut parts = Vec::new();
        for (change_type, label) in [
            (ChangeType::Added, "added"),
            (ChangeType::Removed, "removed"),
            (ChangeType::Modified, "modified"),
        ] {
            let count = self.count(change_type);
            if count > 0 {
                parts.push(format!("{} resources {}", count, label));
            }
        }
        if !self.outputs.is_empty() {
            parts.push(format!("{} outputs changed", self.outputs.len()));
        }
        parts.join(", ")
    }

    /// Multi-line report including line diffs.
    pub fn format_detailed(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("Stack {}\n", self.stack));
        output.push_str(&format!("{}\n", self.summary_text()));

        for change in &self.resources {
            output.push_str(&format!(
                "{} {} ({})\n",
                change.change_type, change.id, change.resource_type
            ));
            if let Some(diff) = &change.text_diff {
                for line in diff.lines() {
                    output.push_str(&format!("    {}\n", line));
                }
            }
        }
        for change in &self.outputs {
            output.push_str(&format!("{} Output {}\n", change.change_type, change.id));
        }
        output
    }
}

fn diff_sections(old: &Map<String, Value>, new: &Map<String, Value>, resources: bool) -> Vec<Change> {
    let resource_type = |value: &Value| {
        if resources {
            value["Type"].as_str().unwrap_or_default().to_string()
        } else {
            String::new()
        }
    };

    let mut changes = Vec::new();
    for (id, value) in new {
        match old.get(id) {
            None => changes.push(Change {
                id: id.clone(),
                resource_type: resource_type(value),
                change_type: ChangeType::Added,
                text_diff: None,
            }),
            Some(previous) if previous != value => changes.push(Change {
                id: id.clone(),
                resource_type: resource_type(value),
                change_type: ChangeType::Modified,
                text_diff: Some(json_diff(previous, value)),
            }),
            Some(_) => {}
        }
    }
    for (id, value) in old {
        if !new.contains_key(id) {
            changes.push(Change {
                id: id.clone(),
                resource_type: resource_type(value),
                change_type: ChangeType::Removed,
                text_diff: None,
            });
        }
    }
    changes
}

/// Line diff of two strings: `+` insertions, `-` deletions, changed lines only.
pub fn text_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let line = change.value().trim_end();
        match change.tag() {
            ChangeTag::Insert => output.push_str(&format!("+{}\n", line)),
            ChangeTag::Delete => output.push_str(&format!("-{}\n", line)),
            ChangeTag::Equal => {}
        }
    }

    output
}

/// Line diff of two JSON values rendered pretty.
pub fn json_diff(old: &Value, new: &Value) -> String {
    let old_str = serde_json::to_string_pretty(old).unwrap_or_default();
    let new_str = serde_json::to_string_pretty(new).unwrap_or_default();
    text_diff(&old_str, &new_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(resources: Value) -> Value {
        json!({"AWSTemplateFormatVersion": "2010-09-09", "Resources": resources})
    }

    #[test]
    fn test_diff_new_stack() {
        let new = template(json!({"Bucket": {"Type": "AWS::S3::Bucket"}}));
        let diff = StackDiff::compute("Device", None, &new);
        assert!(diff.new_stack);
        assert_eq!(diff.resources.len(), 1);
        assert_eq!(diff.resources[0].change_type, ChangeType::Added);
        assert_eq!(diff.summary_text(), "1 resources added");
    }

    #[test]
    fn test_diff_unchanged() {
        let t = template(json!({"Bucket": {"Type": "AWS::S3::Bucket"}}));
        let diff = StackDiff::compute("Device", Some(&t), &t);
        assert!(!diff.has_changes());
        assert_eq!(diff.summary_text(), "No changes detected");
    }

    #[test]
    fn test_diff_modified_and_removed() {
        let old = template(json!({
            "Bucket": {"Type": "AWS::S3::Bucket", "Properties": {"BucketName": "a"}},
            "Topic": {"Type": "AWS::SNS::Topic"}
        }));
        let new = template(json!({
            "Bucket": {"Type": "AWS::S3::Bucket", "Properties": {"BucketName": "b"}}
        }));
        let diff = StackDiff::compute("Device", Some(&old), &new);
        assert_eq!(diff.resources.len(), 2);

        let modified = &diff.resources[0];
        assert_eq!(modified.change_type, ChangeType::Modified);
        let text = modified.text_diff.as_deref().unwrap();
        assert!(text.contains("-    \"BucketName\": \"a\""));
        assert!(text.contains("+    \"BucketName\": \"b\""));

        assert_eq!(diff.resources[1].change_type, ChangeType::Removed);
        assert_eq!(diff.resources[1].resource_type, "AWS::SNS::Topic");
        assert!(diff.format_detailed().contains("- Topic (AWS::SNS::Topic)"));
    }

    #[test]
    fn test_text_diff_only_changed_lines() {
        let diff = text_diff("a\nb\nc\n", "a\nx\nc\n");
        assert_eq!(diff, "-b\n+x\n");
    }
}
