//! Immutable schema registry
//!
//! Schemas are registered once, up front, and the registry is then shared by
//! reference. Each schema is stored in its original form and in its relaxed
//! pre-substitution form so that `$ref` lookups resolve to the variant that
//! matches the validation phase.

use crate::relax::build_pre_substitution_variant;
use crate::validator::Phase;
use crate::{Error, Result};
use ctl_fs::{ConfigStore, NormalizedPath};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;

/// Registry of named schemas.
///
/// # Example
///
/// ```
/// use ctl_meta::{Phase, SchemaRegistry};
/// use serde_json::json;
///
/// let registry = SchemaRegistry::build([("flag", json!({"type": "boolean"}))]).unwrap();
/// assert!(registry.get_schema("flag").is_ok());
/// assert!(registry.get_variant("flag", Phase::PreSubstitution).is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Value>,
    relaxed: BTreeMap<String, Value>,
    /// `$id` -> registered name
    ids: HashMap<String, String>,
}

impl SchemaRegistry {
    /// An empty registry, for callers that only use inline schemas.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from `(name, schema)` pairs.
    pub fn build<N: Into<String>>(entries: impl IntoIterator<Item = (N, Value)>) -> Result<Self> {
        let mut registry = Self::default();
        for (name, schema) in entries {
            registry.insert(name.into(), schema)?;
        }
        Ok(registry)
    }

    /// Build a registry from every YAML, JSON and TOML file under `dir`.
    ///
    /// A schema's name is its path relative to `dir` without the extension,
    /// e.g. `def/entity` for `dir/def/entity.yaml`.
    pub fn build_from_dir(dir: &NormalizedPath) -> Result<Self> {
        let store = ConfigStore::new();
        let mut files = Vec::new();
        collect_schema_files(dir, &mut files)?;
        files.sort();

        let mut registry = Self::default();
        for file in files {
            let schema: Value = store.load(&file)?;
            let relative = file.relative_to(dir).unwrap_or_else(|| file.as_str().to_string());
            let name = match relative.rfind('.') {
                Some(idx) => relative[..idx].to_string(),
                None => relative,
            };
            tracing::debug!(%name, path = %file, "Registered schema");
            registry.insert(name, schema)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, name: String, schema: Value) -> Result<()> {
        if !(schema.is_object() || schema.is_boolean()) {
            return Err(Error::InvalidSchema {
                name,
                message: "a schema must be a mapping or a boolean".into(),
            });
        }
        if let Some(id) = schema.get("$id").and_then(Value::as_str) {
            self.ids.insert(id.to_string(), name.clone());
        }
        self.relaxed
            .insert(name.clone(), build_pre_substitution_variant(&schema));
        self.schemas.insert(name, schema);
        Ok(())
    }

    /// Get a schema in its original form.
    pub fn get_schema(&self, name: &str) -> Result<&Value> {
        self.schemas.get(name).ok_or_else(|| Error::SchemaNotFound {
            name: name.to_string(),
        })
    }

    /// Get the form of a schema used as the root of a validation run.
    ///
    /// For the pre-substitution phase this is the relaxed schema without its
    /// top-level placeholder alternative: the document root is always a
    /// mapping, never a placeholder.
    pub fn get_variant(&self, name: &str, phase: Phase) -> Result<&Value> {
        match phase {
            Phase::PostSubstitution => self.get_schema(name),
            Phase::PreSubstitution => {
                let relaxed = self.relaxed.get(name).ok_or_else(|| Error::SchemaNotFound {
                    name: name.to_string(),
                })?;
                Ok(relaxed.pointer("/anyOf/0").unwrap_or(relaxed))
            }
        }
    }

    /// Resolve a non-local `$ref` by registered name or by `$id`.
    pub(crate) fn resolve_ref(&self, reference: &str, phase: Phase) -> Option<&Value> {
        let name = if self.schemas.contains_key(reference) {
            reference
        } else {
            self.ids.get(reference)?.as_str()
        };
        match phase {
            Phase::PostSubstitution => self.schemas.get(name),
            Phase::PreSubstitution => self.relaxed.get(name),
        }
    }

    /// Registered schema names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn collect_schema_files(dir: &NormalizedPath, out: &mut Vec<NormalizedPath>) -> Result<()> {
    let entries = fs::read_dir(dir.to_native())
        .map_err(|e| Error::Fs(ctl_fs::Error::io(dir.to_native(), e)))?;
    for entry in entries.flatten() {
        let path = NormalizedPath::new(entry.path());
        if path.is_dir() {
            collect_schema_files(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ctl_fs::Format::from_extension(ext).is_some())
        {
            out.push(path);
        }
    }
    Ok(())
}
