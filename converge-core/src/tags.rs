//! Tags - Resource tag maps and their differences
//!
//! Tags are compared as plain key/value maps. Keys with the `aws:` prefix are
//! owned by AWS itself and can never be set or removed by a user, so they are
//! left out of every diff.

use std::collections::BTreeMap;

use serde_json::{Value as JsonValue, json};

/// Prefix of tag keys reserved for AWS
pub const AWS_TAG_PREFIX: &str = "aws:";

/// Ordered tag map
pub type Tags = BTreeMap<String, String>;

/// Changes needed to turn one tag map into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Tags to add or overwrite
    pub upsert: Tags,
    /// Tag keys to delete
    pub remove: Vec<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

/// Returns true for tag keys managed by AWS
pub fn is_system_tag(key: &str) -> bool {
    key.starts_with(AWS_TAG_PREFIX)
}

/// Drop AWS-managed tags from a map
pub fn ignore_system(tags: &Tags) -> Tags {
    tags.iter()
        .filter(|(k, _)| !is_system_tag(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Compute the tag changes from `old` to `new`
pub fn diff(old: &Tags, new: &Tags) -> TagDiff {
    let upsert = new
        .iter()
        .filter(|(k, _)| !is_system_tag(k))
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let remove = old
        .keys()
        .filter(|k| !is_system_tag(k) && !new.contains_key(*k))
        .cloned()
        .collect();

    TagDiff { upsert, remove }
}

/// Build a CloudFormation style tag list: `[{"Key": .., "Value": ..}]`
pub fn to_cfn_json(tags: &Tags) -> JsonValue {
    JsonValue::Array(
        ignore_system(tags)
            .into_iter()
            .map(|(key, value)| json!({"Key": key, "Value": value}))
            .collect(),
    )
}

/// Parse a CloudFormation style tag list, skipping malformed entries
pub fn from_cfn_json(tags: &JsonValue) -> Tags {
    let mut map = Tags::new();
    if let Some(entries) = tags.as_array() {
        for entry in entries {
            if let (Some(key), Some(value)) = (
                entry.get("Key").and_then(|v| v.as_str()),
                entry.get("Value").and_then(|v| v.as_str()),
            ) {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

/// JSON patch operations that move the `/Tags` property from `old` to `new`.
///
/// Cloud Control replaces the tag list as a whole, so any change produces a
/// single operation: `add` when there were no user tags before, `replace`
/// when there were, `remove` when none are left.
pub fn to_patch_ops(old: &Tags, new: &Tags) -> Vec<JsonValue> {
    if diff(old, new).is_empty() {
        return Vec::new();
    }
    let new = ignore_system(new);
    if new.is_empty() {
        vec![json!({"op": "remove", "path": "/Tags"})]
    } else if ignore_system(old).is_empty() {
        vec![json!({"op": "add", "path": "/Tags", "value": to_cfn_json(&new)})]
    } else {
        vec![json!({"op": "replace", "path": "/Tags", "value": to_cfn_json(&new)})]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_add_change_remove() {
        let old = tags(&[("Name", "web"), ("Env", "dev"), ("Owner", "ops")]);
        let new = tags(&[("Name", "web"), ("Env", "prod"), ("Team", "infra")]);

        let d = diff(&old, &new);
        assert_eq!(d.upsert, tags(&[("Env", "prod"), ("Team", "infra")]));
        assert_eq!(d.remove, vec!["Owner".to_string()]);
    }

    #[test]
    fn test_diff_ignores_system_tags() {
        let old = tags(&[("aws:cloudformation:stack-name", "s1"), ("Name", "a")]);
        let new = tags(&[("aws:createdBy", "x"), ("Name", "a")]);

        assert!(diff(&old, &new).is_empty());
    }

    #[test]
    fn test_cfn_json_round_trip_skips_malformed() {
        let json = json!([
            {"Key": "Name", "Value": "web"},
            {"Key": "Broken"},
            {"Key": "aws:cloudformation:logical-id", "Value": "Vpc"}
        ]);
        let parsed = from_cfn_json(&json);
        assert_eq!(parsed.len(), 2);

        let back = to_cfn_json(&parsed);
        assert_eq!(back, json!([{"Key": "Name", "Value": "web"}]));
    }

    #[test]
    fn test_patch_ops() {
        let old = tags(&[("Name", "a")]);

        assert!(to_patch_ops(&old, &old).is_empty());

        let ops = to_patch_ops(&old, &tags(&[("Name", "b")]));
        assert_eq!(
            ops,
            vec![json!({"op": "replace", "path": "/Tags", "value": [{"Key": "Name", "Value": "b"}]})]
        );

        let ops = to_patch_ops(&old, &Tags::new());
        assert_eq!(ops, vec![json!({"op": "remove", "path": "/Tags"})]);
    }

    #[test]
    fn test_patch_ops_adds_when_no_user_tags_existed() {
        let new = tags(&[("Env", "prod")]);
        let expected =
            vec![json!({"op": "add", "path": "/Tags", "value": [{"Key": "Env", "Value": "prod"}]})];

        assert_eq!(to_patch_ops(&Tags::new(), &new), expected);
        assert_eq!(
            to_patch_ops(&tags(&[("aws:cloudformation:stack-id", "s")]), &new),
            expected
        );
    }
}
