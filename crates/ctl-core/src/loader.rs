//! Raw configuration loading
//!
//! Every `*.yaml`/`*.yml` file below the control directory is read in path
//! order and merged into one tree. The hooks directory is skipped. A file may
//! hold several `---` separated documents; empty ones are ignored.

use std::collections::BTreeMap;
use std::fs;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::external::ExternalResolver;
use ctl_content::{MergePolicy, PathSegment, merge_into, parse_path};
use ctl_fs::NormalizedPath;

/// Directory below the control directory that is never loaded.
pub const DEFAULT_HOOKS_DIR: &str = "hooks";

/// Merged raw tree and the files each top-level key came from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedTree {
    pub tree: Value,
    pub sources: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Loader {
    hooks_dir: String,
    policy: MergePolicy,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            hooks_dir: DEFAULT_HOOKS_DIR.to_string(),
            policy: MergePolicy::Strict,
        }
    }
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hooks_dir(mut self, hooks_dir: impl Into<String>) -> Self {
        self.hooks_dir = hooks_dir.into();
        self
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// YAML files below `control_dir`, sorted by path.
    pub fn discover(&self, control_dir: &NormalizedPath) -> Result<Vec<NormalizedPath>> {
        let mut files = Vec::new();
        let hooks = control_dir.join(&self.hooks_dir);
        self.walk(control_dir, &hooks, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn walk(&self, dir: &NormalizedPath, hooks: &NormalizedPath, out: &mut Vec<NormalizedPath>) -> Result<()> {
        let native = dir.to_native();
        let entries = fs::read_dir(&native).map_err(|e| ctl_fs::Error::io(&native, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ctl_fs::Error::io(&native, e))?;
            let path = NormalizedPath::new(entry.path());
            let file_type = entry
                .file_type()
                .map_err(|e| ctl_fs::Error::io(entry.path(), e))?;
            if file_type.is_dir() {
                if path != *hooks {
                    self.walk(&path, hooks, out)?;
                }
            } else if matches!(path.extension(), Some("yaml" | "yml")) {
                out.push(path);
            }
        }
        Ok(())
    }

    /// Load and merge every document below `control_dir`.
    ///
    /// `!ext` tags are resolved through `resolver` while converting.
    pub fn load(&self, control_dir: &NormalizedPath, resolver: &mut ExternalResolver) -> Result<LoadedTree> {
        let mut loaded = LoadedTree {
            tree: Value::Object(Default::default()),
            sources: BTreeMap::new(),
        };

        for file in self.discover(control_dir)? {
            let text = ctl_fs::io::read_text(&file)?;
            let origin = file
                .relative_to(control_dir)
                .unwrap_or_else(|| file.to_string());

            for document in serde_yaml::Deserializer::from_str(&text) {
                let raw = serde_yaml::Value::deserialize(document).map_err(|e| Error::Load {
                    path: origin.clone(),
                    message: e.to_string(),
                })?;
                let value = resolver.yaml_to_json(raw, &origin)?;
                self.merge_document(&mut loaded, value, &origin)?;
            }
        }

        tracing::debug!(
            dir = %control_dir,
            keys = loaded.sources.len(),
            "Configuration loaded"
        );
        Ok(loaded)
    }

    fn merge_document(&self, loaded: &mut LoadedTree, document: Value, origin: &str) -> Result<()> {
        let map = match document {
            Value::Null => {
                tracing::info!(file = origin, "Skipping empty document");
                return Ok(());
            }
            Value::Object(map) if map.is_empty() => {
                tracing::info!(file = origin, "Skipping empty document");
                return Ok(());
            }
            Value::Object(map) => map,
            other => {
                return Err(Error::Load {
                    path: origin.to_string(),
                    message: format!(
                        "top level must be a mapping, found {}",
                        ctl_content::merge::kind_name(&other)
                    ),
                });
            }
        };

        let keys: Vec<String> = map.keys().cloned().collect();
        merge_into(&mut loaded.tree, Value::Object(map), self.policy).map_err(|conflict| {
            let first = match parse_path(&conflict.path).first() {
                Some(PathSegment::Key(key)) => loaded
                    .sources
                    .get(key)
                    .map(|files| files.join(", "))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            Error::Load {
                path: conflict.path.clone(),
                message: format!("{conflict}, defined in '{first}' and '{origin}'"),
            }
        })?;

        for key in keys {
            loaded.sources.entry(key).or_default().push(origin.to_string());
        }
        Ok(())
    }
}
