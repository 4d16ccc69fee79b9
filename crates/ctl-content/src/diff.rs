//! Structural diff between two configuration trees

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::TextDiff;

/// Maximum recursion depth for diff operations
const MAX_DIFF_DEPTH: usize = 128;

/// Kind of change recorded for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
}

/// One changed path between two trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarChange {
    pub path: String,
    pub kind: DiffKind,
}

/// Result of comparing a previous tree with a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarDiff {
    pub changes: Vec<ScalarChange>,
}

impl ScalarDiff {
    /// Compare two trees and collect changed leaf paths.
    ///
    /// Mapping keys are visited in sorted order so the output is stable.
    /// A subtree that only exists on one side is reported once at its root.
    pub fn compute(old: &Value, new: &Value) -> Self {
        let mut changes = Vec::new();
        diff_values_with_depth(old, new, String::new(), &mut changes, 0);
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Paths with the given kind.
    pub fn paths(&self, kind: DiffKind) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(move |c| c.kind == kind)
            .map(|c| c.path.as_str())
    }

    /// Whether anything at or below `prefix` changed.
    pub fn touches(&self, prefix: &str) -> bool {
        self.changes.iter().any(|c| {
            c.path == prefix
                || c.path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
        })
    }
}

fn child_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn diff_values_with_depth(
    old: &Value,
    new: &Value,
    path: String,
    changes: &mut Vec<ScalarChange>,
    depth: usize,
) {
    // Past the depth limit a whole subtree counts as one modification
    if depth > MAX_DIFF_DEPTH {
        if old != new {
            changes.push(ScalarChange {
                path,
                kind: DiffKind::Modified,
            });
        }
        return;
    }

    match (old, new) {
        (Value::Object(old_obj), Value::Object(new_obj)) => {
            let mut keys: Vec<&String> = old_obj.keys().chain(new_obj.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child_path = child_key(&path, key);
                match (old_obj.get(key), new_obj.get(key)) {
                    (Some(o), Some(n)) => {
                        diff_values_with_depth(o, n, child_path, changes, depth + 1)
                    }
                    (Some(_), None) => changes.push(ScalarChange {
                        path: child_path,
                        kind: DiffKind::Removed,
                    }),
                    (None, Some(_)) => changes.push(ScalarChange {
                        path: child_path,
                        kind: DiffKind::Added,
                    }),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(old_arr), Value::Array(new_arr)) => {
            for i in 0..old_arr.len().max(new_arr.len()) {
                let child_path = format!("{path}[{i}]");
                match (old_arr.get(i), new_arr.get(i)) {
                    (Some(o), Some(n)) => {
                        diff_values_with_depth(o, n, child_path, changes, depth + 1)
                    }
                    (Some(_), None) => changes.push(ScalarChange {
                        path: child_path,
                        kind: DiffKind::Removed,
                    }),
                    (None, Some(_)) => changes.push(ScalarChange {
                        path: child_path,
                        kind: DiffKind::Added,
                    }),
                    (None, None) => {}
                }
            }
        }
        _ => {
            if old != new {
                changes.push(ScalarChange {
                    path,
                    kind: DiffKind::Modified,
                });
            }
        }
    }
}

/// Unified line diff between two texts, empty when they are equal.
pub fn unified_text_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(old_label, new_label)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn change(path: &str, kind: DiffKind) -> ScalarChange {
        ScalarChange {
            path: path.to_string(),
            kind,
        }
    }

    #[test]
    fn test_identical_trees_have_empty_diff() {
        let tree = json!({"a": {"b": [1, 2]}, "c": "x"});
        assert!(ScalarDiff::compute(&tree, &tree).is_empty());
    }

    #[test]
    fn test_added_removed_modified_are_sorted() {
        let old = json!({"b": 1, "a": {"x": true}, "gone": [1]});
        let new = json!({"b": 2, "a": {"x": true, "y": null}, "new": {}});
        let diff = ScalarDiff::compute(&old, &new);
        assert_eq!(
            diff.changes,
            vec![
                change("a.y", DiffKind::Added),
                change("b", DiffKind::Modified),
                change("gone", DiffKind::Removed),
                change("new", DiffKind::Added),
            ]
        );
    }

    #[test]
    fn test_array_elements_are_addressed_by_index() {
        let diff = ScalarDiff::compute(&json!({"xs": [1, 2, 3]}), &json!({"xs": [1, 5]}));
        assert_eq!(
            diff.changes,
            vec![change("xs[1]", DiffKind::Modified), change("xs[2]", DiffKind::Removed)]
        );
    }

    #[test]
    fn test_type_change_is_modification() {
        let diff = ScalarDiff::compute(&json!({"a": {"b": 1}}), &json!({"a": "flat"}));
        assert_eq!(diff.changes, vec![change("a", DiffKind::Modified)]);
    }

    #[test]
    fn test_touches_respects_boundaries() {
        let diff = ScalarDiff::compute(&json!({"ab": 1, "a": {"c": 1}}), &json!({"ab": 2, "a": {"c": 1}}));
        assert!(diff.touches("ab"));
        assert!(!diff.touches("a"));
    }

    #[test]
    fn test_handles_deep_nesting() {
        fn nested(depth: usize, leaf: &str) -> Value {
            let mut current = json!({"leaf": leaf});
            for _ in 0..depth {
                current = json!({"n": current});
            }
            current
        }
        assert!(ScalarDiff::compute(&nested(200, "x"), &nested(200, "x")).is_empty());
        assert!(!ScalarDiff::compute(&nested(150, "x"), &nested(150, "y")).is_empty());
    }

    #[test]
    fn test_unified_text_diff() {
        assert_eq!(unified_text_diff("a\n", "a\n", "old", "new"), "");
        let rendered = unified_text_diff("a\nb\n", "a\nc\n", "old", "new");
        assert!(rendered.contains("-b"));
        assert!(rendered.contains("+c"));
        assert!(rendered.starts_with("--- old"));
    }
}
