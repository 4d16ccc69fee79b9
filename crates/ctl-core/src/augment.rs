//! Augmentation steps
//!
//! Steps run between the two pre-substitution validations and add values
//! the configuration does not spell out. They read through the store, so a
//! templated input is resolved before it is used.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::store::NestedStore;
use ctl_deps::{
    Dependency, DependencyResolver, DependencySet, Extras, HostVersion, NeverInstalled, Platform,
    ResolverOptions, VariantSpace,
};
use ctl_fs::NormalizedPath;

/// One augmentation pass over the store.
pub trait AugmentStep {
    fn name(&self) -> &str;

    fn apply(&self, store: &mut NestedStore) -> Result<()>;
}

/// Completes the path fields of every package unit.
///
/// Under `<unit>.path`, `source` and `source_rel` derive from each other
/// given `root`, and likewise `import` and `import_rel` given `source`.
#[derive(Debug, Clone)]
pub struct UnitPathsStep {
    prefix: String,
}

impl Default for UnitPathsStep {
    fn default() -> Self {
        Self::new("pypkg_")
    }
}

impl UnitPathsStep {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

fn path_field(store: &mut NestedStore, path: &str) -> Result<Option<NormalizedPath>> {
    Ok(store
        .get(path)?
        .and_then(|v| v.as_str().map(NormalizedPath::new)))
}

/// Fill whichever of `full` / `rel` (relative to `base`) is missing.
fn complete_pair(
    store: &mut NestedStore,
    base: &NormalizedPath,
    at: &str,
    full: &str,
    rel: &str,
) -> Result<Option<NormalizedPath>> {
    let full_key = format!("{at}.{full}");
    let rel_key = format!("{at}.{rel}");
    match (path_field(store, &full_key)?, path_field(store, &rel_key)?) {
        (Some(full), Some(_)) => Ok(Some(full)),
        (Some(full), None) => {
            if let Some(relative) = full.relative_to(base) {
                store.set(&rel_key, Value::String(relative))?;
            }
            Ok(Some(full))
        }
        (None, Some(relative)) => {
            let full = base.join(relative.as_str());
            store.set(&full_key, Value::String(full.to_string()))?;
            Ok(Some(full))
        }
        (None, None) => Ok(None),
    }
}

impl AugmentStep for UnitPathsStep {
    fn name(&self) -> &str {
        "unit-paths"
    }

    fn apply(&self, store: &mut NestedStore) -> Result<()> {
        for key in store.keys_with_prefix(&self.prefix) {
            let at = format!("{key}.path");
            let Some(root) = path_field(store, &format!("{at}.root"))? else {
                continue;
            };
            if let Some(source) = complete_pair(store, &root, &at, "source", "source_rel")? {
                complete_pair(store, &source, &at, "import", "import_rel")?;
            }
            tracing::debug!(unit = %key, "Unit paths completed");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvironmentSpec {
    platform: Option<String>,
    variants: BTreeMap<String, Vec<Value>>,
    zip_keys: Vec<Vec<String>>,
    overrides: BTreeMap<String, Value>,
    sources: Vec<String>,
    exclude_sources: Vec<String>,
    host: Option<HostSpec>,
    extras: Option<Value>,
    dependencies: Value,
}

#[derive(Debug, Deserialize)]
struct HostSpec {
    dimension: String,
    version: String,
}

/// Resolves the dependencies of every environment entry.
///
/// Writes `<env>.resolved` as `{source: [name, ...]}`. Install probes are
/// never run during a compile.
#[derive(Debug, Clone)]
pub struct EnvironmentStep {
    prefix: String,
}

impl Default for EnvironmentStep {
    fn default() -> Self {
        Self::new("env_")
    }
}

impl EnvironmentStep {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn resolve_entry(&self, entry: Value) -> ctl_deps::Result<Value> {
        let spec: EnvironmentSpec = serde_json::from_value(entry)
            .map_err(|e| ctl_deps::Error::InvalidVariantSpace(e.to_string()))?;

        let space = VariantSpace::from_value(&json!({
            "variants": spec.variants,
            "zip_keys": spec.zip_keys,
        }))?;
        let dependencies = parse_dependencies(&spec.dependencies, spec.extras.as_ref())?;

        let mut options = ResolverOptions {
            overrides: spec.overrides,
            ..ResolverOptions::default()
        }
        .with_source_priority(spec.sources)
        .with_exclude_sources(spec.exclude_sources);
        if let Some(platform) = &spec.platform {
            options = options.with_platform(Platform::from_subdir(platform)?);
        }
        if let Some(host) = spec.host {
            options = options.with_host(HostVersion::new(host.dimension, host.version));
        }

        let resolved = DependencyResolver::new(space)
            .with_probe(NeverInstalled)
            .resolve(&dependencies, &options)?;
        Ok(resolved.names_by_source())
    }
}

fn parse_dependencies(value: &Value, extras: Option<&Value>) -> ctl_deps::Result<Vec<Dependency>> {
    let grouped = value
        .as_object()
        .is_some_and(|map| map.contains_key("core") || map.contains_key("optional"));
    if !grouped {
        return Dependency::list_from_value(value);
    }

    let set: DependencySet = serde_json::from_value(value.clone())
        .map_err(|e| ctl_deps::Error::InvalidDependency(e.to_string()))?;
    let extras = match extras {
        None | Some(Value::Null) => Extras::All,
        Some(Value::String(s)) if s == "all" => Extras::All,
        Some(Value::String(s)) if s == "none" => Extras::None,
        Some(Value::Bool(b)) => {
            if *b {
                Extras::All
            } else {
                Extras::None
            }
        }
        Some(Value::String(s)) => Extras::Named(vec![s.clone()]),
        Some(Value::Array(items)) => Extras::Named(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Some(other) => {
            return Err(ctl_deps::Error::InvalidDependency(format!(
                "extras must be a name, a list of names, 'all' or 'none', found {other}"
            )));
        }
    };
    set.select(&extras)
}

impl AugmentStep for EnvironmentStep {
    fn name(&self) -> &str {
        "environment"
    }

    fn apply(&self, store: &mut NestedStore) -> Result<()> {
        for (key, entry) in store.items_with_prefix(&self.prefix)? {
            if entry.get("dependencies").is_none() {
                continue;
            }
            let resolved = self
                .resolve_entry(entry)
                .map_err(|source| Error::VariantResolution {
                    path: key.clone(),
                    source,
                })?;
            tracing::debug!(environment = %key, "Environment resolved");
            store.set(&format!("{key}.resolved"), resolved)?;
        }
        Ok(())
    }
}

/// The steps every compile runs, in order.
pub fn default_steps() -> Vec<Box<dyn AugmentStep>> {
    vec![
        Box::new(UnitPathsStep::default()),
        Box::new(EnvironmentStep::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unit_paths_derive_both_ways() {
        let mut store = NestedStore::new(json!({
            "pypkg_main": {"name": "demo", "path": {
                "root": "${{ ..name }}",
                "source_rel": "src",
                "import": "demo/src/demo",
            }},
            "pypkg_tool": {"path": {"root": "tools", "source": "tools/lib", "import_rel": "tool"}},
            "pypkg_bare": {"path": {"root": "bare"}},
        }));
        UnitPathsStep::default().apply(&mut store).unwrap();

        assert_eq!(store.get("pypkg_main.path.source").unwrap(), Some(json!("demo/src")));
        assert_eq!(store.get("pypkg_main.path.import_rel").unwrap(), Some(json!("demo")));
        assert_eq!(store.get("pypkg_tool.path.source_rel").unwrap(), Some(json!("lib")));
        assert_eq!(store.get("pypkg_tool.path.import").unwrap(), Some(json!("tools/lib/tool")));
        assert_eq!(store.get("pypkg_bare.path").unwrap(), Some(json!({"root": "bare"})));
    }

    #[test]
    fn environment_buckets_by_source() {
        let mut store = NestedStore::new(json!({
            "env_dev": {
                "platform": "linux-64",
                "sources": ["apt", "pip", "conda"],
                "variants": {"python": ["3.12", "3.11"]},
                "overrides": {"python": "3.11"},
                "dependencies": [
                    {"name": "numpy", "install": {"conda": "numpy", "pip": "numpy"}},
                    {"name": "tomli", "install": {"pip": "tomli"}, "selector": "python < '3.11'"},
                    {"name": "pywin32", "install": {"pip": "pywin32"}, "selector": "win"},
                    {"name": "git", "install": {"apt": "git", "conda": "git"}},
                ],
            },
            "env_empty": {"platform": "linux-64"},
        }));
        EnvironmentStep::default().apply(&mut store).unwrap();

        assert_eq!(
            store.get("env_dev.resolved").unwrap(),
            Some(json!({"apt": ["git"], "pip": ["numpy"]}))
        );
        assert_eq!(store.get("env_empty.resolved").unwrap(), None);
    }

    #[test]
    fn optional_groups_follow_extras() {
        let mut store = NestedStore::new(json!({
            "env_docs": {
                "platform": "osx-arm64",
                "extras": ["docs"],
                "dependencies": {
                    "core": [{"name": "click", "install": {"pip": "click"}}],
                    "optional": [
                        {"name": "docs", "packages": [{"name": "sphinx", "install": {"conda": "sphinx"}}]},
                        {"name": "test", "packages": [{"name": "pytest", "install": {"pip": "pytest"}}]},
                    ],
                },
            },
        }));
        EnvironmentStep::default().apply(&mut store).unwrap();
        assert_eq!(
            store.get("env_docs.resolved").unwrap(),
            Some(json!({"pip": ["click"], "conda": ["sphinx"]}))
        );
    }

    #[test]
    fn resolution_errors_name_the_environment() {
        let mut store = NestedStore::new(json!({
            "env_bad": {
                "platform": "linux-64",
                "dependencies": [{"name": "choco-only", "install": {"choco": "x"}}],
            },
        }));
        let err = EnvironmentStep::default().apply(&mut store).unwrap_err();
        let Error::VariantResolution { path, source } = err else {
            panic!("expected a variant resolution error, got {err:?}");
        };
        assert_eq!(path, "env_bad");
        assert!(matches!(source, ctl_deps::Error::Unsatisfiable { .. }));
    }
}
