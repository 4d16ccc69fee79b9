//! Entity generation from a compiled tree
//!
//! Artifact-specific generators live outside this crate and implement
//! [`Generator`]. Two are built in: declared files (`file_*` entries) and the
//! snapshot of the compiled tree itself.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::entity::{ChangeKind, GeneratedEntity};
use crate::error::{Error, Result};
use crate::pipeline::CompiledTree;
use crate::snapshot::{self, DEFAULT_SNAPSHOT_NAME, PreviousState};
use crate::template::stringify;
use ctl_fs::{Format, NormalizedPath};

/// Produces the entities derived from a compiled tree.
pub trait Generator {
    fn name(&self) -> &str;

    /// Entities for the new tree, including ones only `previous` requested.
    fn generate(&self, compiled: &CompiledTree, previous: &PreviousState) -> Result<Vec<GeneratedEntity>>;
}

/// Files declared directly in the configuration
///
/// ```yaml
/// file_readme:
///   path: README.md
///   type: txt          # json | yaml | toml | txt | exec
///   content: "# ${{ project.name }}"
///   active: true       # false suspends generation and keeps the old file
/// ```
///
/// Structured types render `content`, or `data.value`, or `data` without its
/// embedded schema.
#[derive(Debug, Clone)]
pub struct DeclaredFileGenerator {
    prefix: String,
}

impl Default for DeclaredFileGenerator {
    fn default() -> Self {
        Self::new("file_")
    }
}

impl DeclaredFileGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn keys(&self, compiled: &CompiledTree, previous: &PreviousState) -> BTreeSet<String> {
        [&compiled.tree, previous.tree()]
            .into_iter()
            .filter_map(Value::as_object)
            .flat_map(|map| map.keys())
            .filter(|key| key.starts_with(&self.prefix))
            .cloned()
            .collect()
    }

    fn entity(&self, key: &str, entry: Option<&Value>, previous: Option<&Value>) -> Result<GeneratedEntity> {
        let display = entry
            .and_then(|e| e.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(key);
        let mut entity = GeneratedEntity::file(key, display);

        let before = entry
            .and_then(|e| e.get("path_before"))
            .or_else(|| previous.and_then(|p| p.get("path")))
            .and_then(Value::as_str);
        if let Some(before) = before {
            entity = entity.with_path_before(before);
        }

        let Some(entry) = entry else {
            return Ok(entity);
        };
        let Some(path) = entry.get("path").and_then(Value::as_str) else {
            return Ok(entity);
        };
        entity = entity.with_path(path);

        if entry.get("active").and_then(Value::as_bool) == Some(false) {
            tracing::debug!(file = key, "Generation suspended");
            return Ok(entity.with_change(ChangeKind::Inactive));
        }

        let kind = entry.get("type").and_then(Value::as_str).unwrap_or("txt");
        let body = file_body(entry);
        let content = match kind {
            "txt" | "exec" => stringify(&body),
            "json" => Format::Json.render(&body, path)?,
            "yaml" => Format::Yaml.render(&body, path)?,
            "toml" => Format::Toml.render(&body, path)?,
            other => {
                return Err(Error::Load {
                    path: format!("{key}.type"),
                    message: format!("unknown file type '{other}'"),
                });
            }
        };
        Ok(entity.with_content(content).executable(kind == "exec"))
    }
}

fn file_body(entry: &Value) -> Value {
    if let Some(content) = entry.get("content") {
        return content.clone();
    }
    match entry.get("data") {
        Some(Value::Object(data)) => match data.get("value") {
            Some(value) => value.clone(),
            None => {
                let mut data = data.clone();
                data.remove("jsonschema");
                Value::Object(data)
            }
        },
        Some(other) => other.clone(),
        None => Value::String(String::new()),
    }
}

impl Generator for DeclaredFileGenerator {
    fn name(&self) -> &str {
        "declared-files"
    }

    fn generate(&self, compiled: &CompiledTree, previous: &PreviousState) -> Result<Vec<GeneratedEntity>> {
        self.keys(compiled, previous)
            .into_iter()
            .map(|key| self.entity(&key, compiled.tree.get(&key), previous.tree().get(&key)))
            .collect()
    }
}

/// Emits the snapshot of the compiled tree into the control directory
#[derive(Debug, Clone)]
pub struct SnapshotGenerator {
    file_name: String,
    default_dir: String,
}

impl Default for SnapshotGenerator {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_SNAPSHOT_NAME.to_string(),
            default_dir: ".control".to_string(),
        }
    }
}

impl SnapshotGenerator {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Directory used when the tree has no `control.path`.
    pub fn with_default_dir(mut self, dir: impl Into<String>) -> Self {
        self.default_dir = dir.into();
        self
    }

    fn location(&self, control_path: Option<&str>) -> NormalizedPath {
        NormalizedPath::new(control_path.unwrap_or(&self.default_dir)).join(&self.file_name)
    }
}

impl Generator for SnapshotGenerator {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn generate(&self, compiled: &CompiledTree, previous: &PreviousState) -> Result<Vec<GeneratedEntity>> {
        let mut entity = GeneratedEntity::file("snapshot", "Metadata snapshot")
            .with_path(self.location(compiled.get_str("control.path")))
            .with_content(snapshot::render(&compiled.tree)?);
        if !previous.is_empty() {
            entity = entity.with_path_before(self.location(previous.get_str("control.path")));
        }
        Ok(vec![entity])
    }
}
