//! Generated entities and their change classification

use std::fmt;

use serde::{Deserialize, Serialize};

use ctl_fs::NormalizedPath;

/// How an entity differs between the previous and the new compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Unchanged,
    Added,
    Removed,
    Modified,
    Moved,
    MovedModified,
    /// Requested by neither the old nor the new configuration
    Disabled,
    /// Configured, but generation is suspended; the previous path is kept
    Inactive,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "UNCHANGED",
            Self::Added => "ADDED",
            Self::Removed => "REMOVED",
            Self::Modified => "MODIFIED",
            Self::Moved => "MOVED",
            Self::MovedModified => "MOVED_MODIFIED",
            Self::Disabled => "DISABLED",
            Self::Inactive => "INACTIVE",
        }
    }

    /// Whether applying this change touches the filesystem.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged | Self::Disabled | Self::Inactive)
    }

    /// Kinds that need the previous path.
    pub fn needs_previous_path(&self) -> bool {
        matches!(self, Self::Removed | Self::Moved | Self::MovedModified)
    }

    /// Kinds that need the new path.
    pub fn needs_new_path(&self) -> bool {
        matches!(
            self,
            Self::Added | Self::Modified | Self::Moved | Self::MovedModified
        )
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    File,
    Directory,
}

/// What kind of artifact an entity is, e.g. `("license", "License file")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySubtype {
    pub id: String,
    pub display: String,
}

/// One file or directory whose presence and content derive from configuration.
///
/// Paths are relative to the repository root. `path == None` means the new
/// configuration does not request the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedEntity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub subtype: EntitySubtype,
    pub path: Option<NormalizedPath>,
    pub path_before: Option<NormalizedPath>,
    pub content: Option<String>,
    /// Set by the classifier, or preset by a generator
    pub change: Option<ChangeKind>,
    #[serde(default)]
    pub executable: bool,
}

impl GeneratedEntity {
    pub fn file(id: impl Into<String>, display: impl Into<String>) -> Self {
        Self::new(EntityType::File, id, display)
    }

    pub fn directory(id: impl Into<String>, display: impl Into<String>) -> Self {
        Self::new(EntityType::Directory, id, display)
    }

    fn new(entity_type: EntityType, id: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            entity_type,
            subtype: EntitySubtype {
                id: id.into(),
                display: display.into(),
            },
            path: None,
            path_before: None,
            content: None,
            change: None,
            executable: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<NormalizedPath>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_path_before(mut self, path: impl Into<NormalizedPath>) -> Self {
        self.path_before = Some(path.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_change(mut self, change: ChangeKind) -> Self {
        self.change = Some(change);
        self
    }

    pub fn executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.entity_type == EntityType::Directory
    }

    /// The classification, treating "not yet classified" as unchanged.
    pub fn change_kind(&self) -> ChangeKind {
        self.change.unwrap_or(ChangeKind::Unchanged)
    }

    /// The path shown to users: the new path, or the previous one for removals.
    pub fn display_path(&self) -> String {
        self.path
            .as_ref()
            .or(self.path_before.as_ref())
            .map(|p| p.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn serializes_with_upper_case_change() {
        let entity = GeneratedEntity::file("readme", "Readme")
            .with_path("README.md")
            .with_content("# Demo")
            .with_change(ChangeKind::MovedModified);
        assert_eq!(
            serde_json::to_value(&entity).unwrap(),
            json!({
                "type": "file",
                "subtype": {"id": "readme", "display": "Readme"},
                "path": "README.md",
                "path_before": null,
                "content": "# Demo",
                "change": "MOVED_MODIFIED",
                "executable": false
            })
        );
    }

    #[test]
    fn path_requirements() {
        assert!(ChangeKind::Removed.needs_previous_path());
        assert!(!ChangeKind::Removed.needs_new_path());
        assert!(ChangeKind::MovedModified.needs_previous_path());
        assert!(ChangeKind::MovedModified.needs_new_path());
        assert!(!ChangeKind::Inactive.is_change());
    }

    #[test]
    fn display_path_falls_back_to_previous() {
        let removed = GeneratedEntity::file("x", "X").with_path_before("old.txt");
        assert_eq!(removed.display_path(), "old.txt");
        assert_eq!(GeneratedEntity::file("x", "X").display_path(), "<none>");
    }
}
