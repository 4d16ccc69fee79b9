//! Wildcard selection over configuration trees
//!
//! Patterns use the dotted path syntax, where each key segment may contain
//! `*` wildcards (`pypkg_*.path.root`, `branch.*.name`). A bare `*` also
//! matches every index of a sequence.

use crate::path::{PathSegment, format_path, parse_path};
use serde_json::Value;

/// Glob match of a single key against a pattern segment.
pub fn segment_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }
    let mut rest = &key[first.len()..key.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    true
}

fn segment_accepts(pattern: &PathSegment, actual: &PathSegment) -> bool {
    match (pattern, actual) {
        (PathSegment::Key(p), PathSegment::Key(k)) => segment_matches(p, k),
        (PathSegment::Key(p), PathSegment::Index(_)) => p == "*",
        (PathSegment::Index(p), PathSegment::Index(i)) => p == i,
        (PathSegment::Index(_), PathSegment::Key(_)) => false,
    }
}

/// Whether `path` lies at or below a node matched by `pattern`.
pub fn is_under(pattern: &[PathSegment], path: &[PathSegment]) -> bool {
    path.len() >= pattern.len()
        && pattern
            .iter()
            .zip(path)
            .all(|(p, actual)| segment_accepts(p, actual))
}

/// Collect every node matched by `pattern`, with its concrete path.
///
/// Results follow document order for sequences and sorted key order for
/// mappings.
pub fn select<'a>(value: &'a Value, pattern: &str) -> Vec<(String, &'a Value)> {
    let segments = parse_path(pattern);
    let mut out = Vec::new();
    let mut trail = Vec::new();
    select_into(value, &segments, &mut trail, &mut out);
    out
}

fn select_into<'a>(
    value: &'a Value,
    pattern: &[PathSegment],
    trail: &mut Vec<PathSegment>,
    out: &mut Vec<(String, &'a Value)>,
) {
    let Some((head, rest)) = pattern.split_first() else {
        out.push((format_path(trail), value));
        return;
    };
    match (head, value) {
        (PathSegment::Key(p), Value::Object(map)) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| segment_matches(p, k)).collect();
            keys.sort();
            for key in keys {
                trail.push(PathSegment::Key(key.clone()));
                select_into(&map[key.as_str()], rest, trail, out);
                trail.pop();
            }
        }
        (PathSegment::Key(p), Value::Array(items)) if p == "*" => {
            for (idx, item) in items.iter().enumerate() {
                trail.push(PathSegment::Index(idx));
                select_into(item, rest, trail, out);
                trail.pop();
            }
        }
        (PathSegment::Index(idx), Value::Array(items)) => {
            if let Some(item) = items.get(*idx) {
                trail.push(PathSegment::Index(*idx));
                select_into(item, rest, trail, out);
                trail.pop();
            }
        }
        _ => {}
    }
}
