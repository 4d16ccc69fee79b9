//! Dotted path parsing and traversal
//!
//! # Path Syntax
//!
//! - Dot-separated keys: `project.license.id`
//! - Array indexing: `units[0].name`
//! - Combined: `env_dev.dependencies[2].install.pip`
//!
//! # Examples
//!
//! ```
//! use ctl_content::path::{parse_path, PathSegment, get_at_path};
//! use serde_json::json;
//!
//! let path = parse_path("units[0].name");
//! assert_eq!(path, vec![
//!     PathSegment::Key("units".to_string()),
//!     PathSegment::Index(0),
//!     PathSegment::Key("name".to_string()),
//! ]);
//!
//! let value = json!({"units": [{"name": "core"}]});
//! assert_eq!(get_at_path(&value, &path), Some(&json!("core")));
//! ```

use crate::{Error, Result};
use serde_json::{Map, Value};

/// A segment of a path - either a key or an array index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse a path string into segments.
///
/// Empty components are ignored, so `"a..b"` and `"a.b"` address the same node.
/// A bracket that does not hold an integer is kept as a literal key.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current_key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
            }
            '[' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
                let mut index_str = String::new();
                for ch in chars.by_ref() {
                    if ch == ']' {
                        break;
                    }
                    index_str.push(ch);
                }
                match index_str.trim().parse::<usize>() {
                    Ok(index) => segments.push(PathSegment::Index(index)),
                    Err(_) => segments.push(PathSegment::Key(index_str)),
                }
            }
            _ => current_key.push(ch),
        }
    }

    if !current_key.is_empty() {
        segments.push(PathSegment::Key(current_key));
    }

    segments
}

/// Render segments back into the canonical `a.b[0].c` form.
pub fn format_path(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Get a reference to the value at the given path.
///
/// Returns `None` if the path doesn't exist.
pub fn get_at_path<'a>(value: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        PathSegment::Key(key) => current.get(key),
        PathSegment::Index(idx) => current.get(*idx),
    })
}

/// Get a mutable reference to the value at the given path.
pub fn get_at_path_mut<'a>(value: &'a mut Value, segments: &[PathSegment]) -> Option<&'a mut Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        PathSegment::Key(key) => current.get_mut(key.as_str()),
        PathSegment::Index(idx) => current.get_mut(*idx),
    })
}

/// Set a value at the given path.
///
/// Missing intermediate mappings are created. Traversing through a scalar or
/// indexing past the end of a sequence is an error.
pub fn set_at_path(value: &mut Value, segments: &[PathSegment], new_value: Value) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        *value = new_value;
        return Ok(());
    };

    let mut current = value;
    for (depth, segment) in parents.iter().enumerate() {
        current = match segment {
            PathSegment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new())),
                    _ => return Err(not_a_container(&segments[..=depth], "mapping")),
                }
            }
            PathSegment::Index(idx) => match current {
                Value::Array(items) if *idx < items.len() => &mut items[*idx],
                _ => return Err(not_a_container(&segments[..=depth], "sequence")),
            },
        };
    }

    match (last, current) {
        (PathSegment::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), new_value);
            Ok(())
        }
        (PathSegment::Key(key), slot) if slot.is_null() => {
            let mut map = Map::new();
            map.insert(key.clone(), new_value);
            *slot = Value::Object(map);
            Ok(())
        }
        (PathSegment::Index(idx), Value::Array(items)) if *idx < items.len() => {
            items[*idx] = new_value;
            Ok(())
        }
        (PathSegment::Index(idx), Value::Array(items)) if *idx == items.len() => {
            items.push(new_value);
            Ok(())
        }
        _ => Err(not_a_container(segments, "container")),
    }
}

fn not_a_container(segments: &[PathSegment], expected: &str) -> Error {
    Error::PathSetFailed {
        path: format_path(segments),
        reason: format!("parent is not a {expected}"),
    }
}

/// Remove a value at the given path.
///
/// Returns the removed value if the path existed, `None` otherwise.
pub fn remove_at_path(value: &mut Value, segments: &[PathSegment]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = value;
    for segment in parents {
        current = match segment {
            PathSegment::Key(key) => current.get_mut(key.as_str())?,
            PathSegment::Index(idx) => current.get_mut(*idx)?,
        };
    }
    match (last, current) {
        (PathSegment::Key(key), Value::Object(map)) => map.remove(key),
        (PathSegment::Index(idx), Value::Array(items)) if *idx < items.len() => {
            Some(items.remove(*idx))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_and_format_roundtrip() {
        for path in ["a", "a.b.c", "items[0]", "env.deps[2].install.pip", "[1][2]"] {
            assert_eq!(format_path(&parse_path(path)), path);
        }
    }

    #[test]
    fn test_parse_ignores_empty_components() {
        assert_eq!(parse_path("a..b."), parse_path("a.b"));
        assert!(parse_path("").is_empty());
    }

    #[test]
    fn test_set_creates_intermediate_mappings() {
        let mut value = json!({});
        set_at_path(&mut value, &parse_path("a.b.c"), json!(1)).unwrap();
        assert_eq!(value, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_appends_at_sequence_end() {
        let mut value = json!({"xs": [1]});
        set_at_path(&mut value, &parse_path("xs[1]"), json!(2)).unwrap();
        assert_eq!(value, json!({"xs": [1, 2]}));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut value = json!({"a": 3});
        let err = set_at_path(&mut value, &parse_path("a.b"), json!(1)).unwrap_err();
        assert!(matches!(err, Error::PathSetFailed { path, .. } if path == "a.b"));
    }

    #[test]
    fn test_remove_at_path() {
        let mut value = json!({"a": {"b": 1, "c": 2}, "xs": [1, 2, 3]});
        assert_eq!(remove_at_path(&mut value, &parse_path("a.b")), Some(json!(1)));
        assert_eq!(remove_at_path(&mut value, &parse_path("xs[1]")), Some(json!(2)));
        assert_eq!(remove_at_path(&mut value, &parse_path("a.missing")), None);
        assert_eq!(value, json!({"a": {"c": 2}, "xs": [1, 3]}));
    }
}
