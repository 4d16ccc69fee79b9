//! Snapshot of the last compiled tree
//!
//! Stored as pretty JSON with sorted keys so that compiling the same input
//! twice produces byte-identical files.

use serde_json::Value;

use crate::error::{Error, Result};
use ctl_content::{get_at_path, parse_path};
use ctl_fs::{NormalizedPath, io};

/// File name of the snapshot inside the control directory.
pub const DEFAULT_SNAPSHOT_NAME: &str = "metadata.json";

/// Render a tree in snapshot form.
pub fn render(tree: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(tree)?)
}

/// Read a snapshot. A missing file is `None`.
pub fn load(path: &NormalizedPath) -> Result<Option<Value>> {
    let Some(text) = io::read_text_if_exists(path)? else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| Error::Load {
            path: path.to_string(),
            message: format!("invalid snapshot: {e}"),
        })
}

/// Write a snapshot atomically.
pub fn save(path: &NormalizedPath, tree: &Value) -> Result<()> {
    let mut text = render(tree)?;
    text.push('\n');
    io::write_text(path, &text)?;
    Ok(())
}

/// The tree of the previous compile, or an empty one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviousState {
    tree: Value,
}

impl PreviousState {
    /// No previous compile.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tree(tree: Value) -> Self {
        Self { tree }
    }

    /// Load from a snapshot file.
    ///
    /// A missing snapshot is an empty state. So is a corrupt one, with a
    /// warning: existence checks against the filesystem take over.
    pub fn load(path: &NormalizedPath) -> Result<Self> {
        match load(path) {
            Ok(tree) => Ok(Self::from_tree(tree.unwrap_or(Value::Null))),
            Err(Error::Load { message, .. }) => {
                tracing::warn!(path = %path, %message, "Ignoring unreadable snapshot");
                Ok(Self::empty())
            }
            Err(e) => Err(e),
        }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn is_empty(&self) -> bool {
        match &self.tree {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_at_path(&self.tree, &parse_path(path))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn saves_sorted_and_stable() {
        let dir = TempDir::new().unwrap();
        let path = NormalizedPath::new(dir.path().join("metadata.json"));
        let tree = json!({"b": {"y": 1, "x": [true]}, "a": "first"});

        save(&path, &tree).unwrap();
        let first = std::fs::read_to_string(path.to_native()).unwrap();
        assert_eq!(
            first,
            "{\n  \"a\": \"first\",\n  \"b\": {\n    \"x\": [\n      true\n    ],\n    \"y\": 1\n  }\n}\n"
        );

        save(&path, &load(&path).unwrap().unwrap()).unwrap();
        assert_eq!(std::fs::read_to_string(path.to_native()).unwrap(), first);
    }

    #[test]
    fn missing_and_corrupt_snapshots_are_empty() {
        let dir = TempDir::new().unwrap();
        let path = NormalizedPath::new(dir.path().join("metadata.json"));
        assert!(PreviousState::load(&path).unwrap().is_empty());

        std::fs::write(path.to_native(), "{not json").unwrap();
        assert!(matches!(load(&path), Err(Error::Load { .. })));
        assert!(PreviousState::load(&path).unwrap().is_empty());
    }

    #[test]
    fn previous_state_lookup() {
        let previous = PreviousState::from_tree(json!({"control": {"path": ".control"}}));
        assert_eq!(previous.get_str("control.path"), Some(".control"));
        assert_eq!(previous.get("missing"), None);
        assert!(!previous.is_empty());
    }
}
