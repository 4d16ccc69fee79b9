//! Policy-driven merging of configuration trees

use crate::path::{PathSegment, format_path};
use serde_json::Value;

/// How two values at the same path are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Mappings merge recursively, sequences concatenate, anything else
    /// defined twice is a conflict.
    #[default]
    Strict,
    /// Mappings merge recursively, otherwise the incoming value replaces the
    /// existing one.
    Overlay,
}

/// Two documents define the same path with values that cannot be combined.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate definition of '{path}' ({existing} vs {incoming})")]
pub struct MergeConflict {
    pub path: String,
    pub existing: &'static str,
    pub incoming: &'static str,
}

/// Human name of a value's node type.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Merge `incoming` on top of `base` and return the combined tree.
pub fn merge(base: Value, incoming: Value, policy: MergePolicy) -> Result<Value, MergeConflict> {
    let mut base = base;
    merge_into(&mut base, incoming, policy)?;
    Ok(base)
}

/// Merge `incoming` into `target` in place.
///
/// On conflict `target` may be partially merged.
pub fn merge_into(target: &mut Value, incoming: Value, policy: MergePolicy) -> Result<(), MergeConflict> {
    let mut path = Vec::new();
    merge_at(target, incoming, policy, &mut path)
}

fn merge_at(
    target: &mut Value,
    incoming: Value,
    policy: MergePolicy,
    path: &mut Vec<PathSegment>,
) -> Result<(), MergeConflict> {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(new_entries)) => {
            for (key, value) in new_entries {
                match existing.get_mut(&key) {
                    Some(slot) => {
                        path.push(PathSegment::Key(key));
                        merge_at(slot, value, policy, path)?;
                        path.pop();
                    }
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (Value::Array(existing), Value::Array(new_items)) if policy == MergePolicy::Strict => {
            existing.extend(new_items);
            Ok(())
        }
        (slot, value) => match policy {
            MergePolicy::Overlay => {
                *slot = value;
                Ok(())
            }
            MergePolicy::Strict => Err(MergeConflict {
                path: format_path(path),
                existing: kind_name(slot),
                incoming: kind_name(&value),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn strict_merges_mappings_and_concatenates_sequences() {
        let a = json!({"project": {"name": "demo"}, "tags": ["a"]});
        let b = json!({"project": {"license": "MIT"}, "tags": ["b"], "extra": 1});
        let merged = merge(a, b, MergePolicy::Strict).unwrap();
        assert_eq!(
            merged,
            json!({"project": {"name": "demo", "license": "MIT"}, "tags": ["a", "b"], "extra": 1})
        );
    }

    #[test]
    fn strict_rejects_two_scalars() {
        let err = merge(
            json!({"project": {"name": "a"}}),
            json!({"project": {"name": "b"}}),
            MergePolicy::Strict,
        )
        .unwrap_err();
        assert_eq!(err.path, "project.name");
        assert_eq!((err.existing, err.incoming), ("string", "string"));
    }

    #[test]
    fn strict_rejects_scalar_versus_mapping() {
        let err = merge(json!({"a": 1}), json!({"a": {"b": 2}}), MergePolicy::Strict).unwrap_err();
        assert_eq!(err.existing, "number");
        assert_eq!(err.incoming, "mapping");
    }

    #[test]
    fn overlay_replaces_non_mappings() {
        let merged = merge(
            json!({"a": {"x": 1, "y": [1]}}),
            json!({"a": {"x": 2, "y": [2]}}),
            MergePolicy::Overlay,
        )
        .unwrap();
        assert_eq!(merged, json!({"a": {"x": 2, "y": [2]}}));
    }
}
