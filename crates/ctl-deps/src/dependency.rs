//! Dependency descriptors and source resolution.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::probe::{CommandProbe, InstallProbe};
use crate::selector::Selector;
use crate::variant::{HostVersion, ResolvedVariants, VariantSpace};

/// A dependency installable from one or more sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    /// Source name (`pip`, `conda`, `apt`, ...) to its install spec.
    #[serde(default)]
    pub install: BTreeMap<String, Value>,
    /// Boolean expression gating this dependency; see [`Selector`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Snippet that succeeds when the dependency is already installed.
    #[serde(default, alias = "validator", skip_serializing_if = "Option::is_none")]
    pub probe: Option<String>,
    /// Variant dimensions this dependency varies with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            install: BTreeMap::new(),
            selector: None,
            probe: None,
            variants: Vec::new(),
        }
    }

    pub fn with_install(mut self, source: impl Into<String>, spec: impl Into<Value>) -> Self {
        self.install.insert(source.into(), spec.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_probe(mut self, probe: impl Into<String>) -> Self {
        self.probe = Some(probe.into());
        self
    }

    pub fn with_variants(mut self, variants: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.variants = variants.into_iter().map(Into::into).collect();
        self
    }

    /// Sources this dependency can be installed from, sorted.
    pub fn available_sources(&self) -> Vec<String> {
        self.install.keys().cloned().collect()
    }

    /// Parse a list of dependencies, or a mapping of `key -> dependency`
    /// where a missing `name` defaults to the key.
    pub fn list_from_value(value: &Value) -> Result<Vec<Dependency>> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    serde_json::from_value(item.clone())
                        .map_err(|e| Error::InvalidDependency(e.to_string()))
                })
                .collect(),
            Value::Object(map) => map
                .iter()
                .map(|(key, item)| {
                    let mut item = item.clone();
                    if let Value::Object(fields) = &mut item {
                        fields
                            .entry("name")
                            .or_insert_with(|| Value::String(key.clone()));
                    }
                    serde_json::from_value(item)
                        .map_err(|e| Error::InvalidDependency(format!("{key}: {e}")))
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::InvalidDependency(format!(
                "expected a list or mapping of dependencies, found {other}"
            ))),
        }
    }
}

/// A named group of optional dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalGroup {
    pub name: String,
    #[serde(default)]
    pub packages: Vec<Dependency>,
}

/// Which optional groups to include.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Extras {
    None,
    #[default]
    All,
    Named(Vec<String>),
}

/// A named bundle of optional groups, selectable as one extra.
///
/// When `compatible` is false, at most one of its members may be requested
/// at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBundle {
    pub name: String,
    #[serde(default)]
    pub optionals: Vec<String>,
    #[serde(default = "default_compatible")]
    pub compatible: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn default_compatible() -> bool {
    true
}

/// Core dependencies plus optional groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencySet {
    #[serde(default)]
    pub core: Vec<Dependency>,
    #[serde(default)]
    pub optional: Vec<OptionalGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupBundle>,
}

impl DependencySet {
    /// Reject a request naming more than one member of an incompatible bundle.
    pub fn verify_compatibility(&self, extras: &[String]) -> Result<()> {
        for bundle in self.groups.iter().filter(|b| !b.compatible) {
            let requested: Vec<String> = bundle
                .optionals
                .iter()
                .filter(|member| extras.contains(member))
                .cloned()
                .collect();
            if requested.len() > 1 {
                return Err(Error::IncompatibleOptionalGroups {
                    groups: requested,
                    description: bundle.description.clone(),
                });
            }
        }
        Ok(())
    }

    /// Core dependencies followed by the selected optional groups, in declaration order.
    ///
    /// A named extra is either an optional group or a bundle, which stands
    /// for all of its members.
    pub fn select(&self, extras: &Extras) -> Result<Vec<Dependency>> {
        let mut requested: Vec<&str> = Vec::new();
        if let Extras::Named(names) = extras {
            self.verify_compatibility(names)?;
            for name in names {
                if let Some(bundle) = self.groups.iter().find(|b| &b.name == name) {
                    requested.extend(bundle.optionals.iter().map(String::as_str));
                } else if self.optional.iter().any(|g| &g.name == name) {
                    requested.push(name);
                } else {
                    return Err(Error::UnknownOptionalGroup { name: name.clone() });
                }
            }
        }

        let mut deps = self.core.clone();
        for group in &self.optional {
            let included = match extras {
                Extras::None => false,
                Extras::All => true,
                Extras::Named(_) => requested.contains(&group.name.as_str()),
            };
            if included {
                deps.extend(group.packages.iter().cloned());
            }
        }
        Ok(deps)
    }
}

/// Inputs of one resolution call.
#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Target platform; the native platform when unset.
    pub platform: Option<Platform>,
    pub overrides: BTreeMap<String, Value>,
    /// Sources in order of preference; the platform default when empty.
    pub source_priority: Vec<String>,
    pub exclude_sources: Vec<String>,
    pub exclude_installed: bool,
    pub host: Option<HostVersion>,
}

impl ResolverOptions {
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_override(mut self, dimension: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(dimension.into(), value.into());
        self
    }

    pub fn with_source_priority(mut self, sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.source_priority = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclude_sources(mut self, sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclude_installed(mut self, exclude: bool) -> Self {
        self.exclude_installed = exclude;
        self
    }

    pub fn with_host(mut self, host: HostVersion) -> Self {
        self.host = Some(host);
        self
    }
}

/// Resolves dependencies against a variant space.
pub struct DependencyResolver {
    space: VariantSpace,
    probe: Box<dyn InstallProbe>,
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

impl DependencyResolver {
    /// A resolver probing with `python -c`.
    pub fn new(space: VariantSpace) -> Self {
        Self {
            space,
            probe: Box::new(CommandProbe::python()),
        }
    }

    pub fn with_probe(mut self, probe: impl InstallProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn space(&self) -> &VariantSpace {
        &self.space
    }

    /// Resolve variants, filter `dependencies` and bucket each survivor
    /// under the first source in priority order that can install it.
    ///
    /// Buckets come out in source-priority order; within a bucket the input
    /// order is kept. A dependency no source can install is an error.
    pub fn resolve(
        &self,
        dependencies: &[Dependency],
        options: &ResolverOptions,
    ) -> Result<ResolvedDependencies> {
        let platform = match &options.platform {
            Some(platform) => platform.clone(),
            None => Platform::native()?,
        };
        let variants = self.space.resolve(&options.overrides, options.host.as_ref())?;

        let mut env = platform.selector_env();
        variants.extend_env(&mut env);

        let sources = if options.source_priority.is_empty() {
            platform.default_source_order()
        } else {
            options.source_priority.clone()
        };

        let mut buckets: Vec<(String, Vec<Dependency>)> = Vec::new();

        for dep in dependencies {
            if let Some(dim) = dep
                .variants
                .iter()
                .find(|d| self.space.dimension(d).is_none())
            {
                return Err(Error::UnknownVariantDimension {
                    dimension: dim.clone(),
                });
            }

            if let Some(excluded) = options
                .exclude_sources
                .iter()
                .find(|s| dep.install.contains_key(*s))
            {
                tracing::debug!(dependency = %dep.name, source = %excluded, "Skipped: excluded source");
                continue;
            }

            if let Some(selector) = &dep.selector {
                if !Selector::parse(selector)?.evaluate(&env)? {
                    tracing::debug!(dependency = %dep.name, %selector, "Skipped: selector is false");
                    continue;
                }
            }

            if options.exclude_installed {
                if let Some(probe) = &dep.probe {
                    if self.probe.is_installed(dep, probe) {
                        tracing::debug!(dependency = %dep.name, "Skipped: already installed");
                        continue;
                    }
                }
            }

            let source = sources
                .iter()
                .find(|s| dep.install.contains_key(*s))
                .ok_or_else(|| Error::Unsatisfiable {
                    name: dep.name.clone(),
                    available: dep.available_sources(),
                })?;

            match buckets.iter_mut().find(|(s, _)| s == source) {
                Some((_, bucket)) => bucket.push(dep.clone()),
                None => buckets.push((source.clone(), vec![dep.clone()])),
            }
        }

        buckets.sort_by_key(|(source, _)| sources.iter().position(|s| s == source));

        tracing::debug!(
            platform = %platform,
            sources = buckets.len(),
            "Resolved dependencies"
        );

        Ok(ResolvedDependencies {
            platform,
            variants,
            buckets,
        })
    }
}

/// Dependencies bucketed by chosen source, in source-priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDependencies {
    platform: Platform,
    variants: ResolvedVariants,
    buckets: Vec<(String, Vec<Dependency>)>,
}

impl ResolvedDependencies {
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn variants(&self) -> &ResolvedVariants {
        &self.variants
    }

    pub fn get(&self, source: &str) -> Option<&[Dependency]> {
        self.buckets
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, deps)| deps.as_slice())
    }

    pub fn sources(&self) -> Vec<&str> {
        self.buckets.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Dependency])> {
        self.buckets
            .iter()
            .map(|(s, deps)| (s.as_str(), deps.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of resolved dependencies across all sources.
    pub fn dependency_count(&self) -> usize {
        self.buckets.iter().map(|(_, deps)| deps.len()).sum()
    }

    /// `{source: [name, ...]}`.
    pub fn names_by_source(&self) -> Value {
        Value::Object(
            self.buckets
                .iter()
                .map(|(source, deps)| {
                    let names = deps.iter().map(|d| Value::String(d.name.clone())).collect();
                    (source.clone(), Value::Array(names))
                })
                .collect(),
        )
    }
}

impl Serialize for ResolvedDependencies {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.buckets.len()))?;
        for (source, deps) in &self.buckets {
            map.serialize_entry(source, deps)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::NeverInstalled;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn linux() -> ResolverOptions {
        ResolverOptions::default().with_platform(Platform::from_subdir("linux-64").unwrap())
    }

    #[test]
    fn parses_mapping_form_with_key_names() {
        let deps = Dependency::list_from_value(&json!({
            "numpy": {"install": {"pip": {"spec": ">=2"}}, "validator": "import numpy"},
            "git": {"name": "git-core", "install": {"apt": "git"}}
        }))
        .unwrap();
        assert_eq!(deps[0].name, "git-core");
        assert_eq!(deps[1].name, "numpy");
        assert_eq!(deps[1].probe.as_deref(), Some("import numpy"));
    }

    #[test]
    fn rejects_scalar_dependency_list() {
        assert!(Dependency::list_from_value(&json!("numpy")).is_err());
        assert!(Dependency::list_from_value(&json!([{"install": {}}])).is_err());
    }

    #[test]
    fn extras_selection() {
        let set = DependencySet {
            groups: Vec::new(),
            core: vec![Dependency::new("a")],
            optional: vec![
                OptionalGroup {
                    name: "docs".into(),
                    packages: vec![Dependency::new("sphinx")],
                },
                OptionalGroup {
                    name: "test".into(),
                    packages: vec![Dependency::new("pytest")],
                },
            ],
        };
        let names = |deps: Vec<Dependency>| deps.into_iter().map(|d| d.name).collect::<Vec<_>>();

        assert_eq!(names(set.select(&Extras::None).unwrap()), ["a"]);
        assert_eq!(names(set.select(&Extras::All).unwrap()), ["a", "sphinx", "pytest"]);
        assert_eq!(
            names(set.select(&Extras::Named(vec!["test".into()])).unwrap()),
            ["a", "pytest"]
        );
        assert!(matches!(
            set.select(&Extras::Named(vec!["lint".into()])),
            Err(Error::UnknownOptionalGroup { .. })
        ));
    }

    #[test]
    fn incompatible_groups_rejected() {
        let set: DependencySet = serde_json::from_value(json!({
            "core": [{"name": "numpy"}],
            "optional": [
                {"name": "cpu", "packages": [{"name": "torch-cpu"}]},
                {"name": "cuda", "packages": [{"name": "torch-cuda"}]},
                {"name": "docs", "packages": [{"name": "sphinx"}]}
            ],
            "groups": [
                {"name": "backend", "optionals": ["cpu", "cuda"], "compatible": false,
                 "description": "Pick one torch backend."},
                {"name": "dev", "optionals": ["cuda", "docs"]}
            ]
        }))
        .unwrap();
        let names = |deps: Vec<Dependency>| deps.into_iter().map(|d| d.name).collect::<Vec<_>>();

        let err = set
            .select(&Extras::Named(vec!["cpu".into(), "docs".into(), "cuda".into()]))
            .unwrap_err();
        match err {
            Error::IncompatibleOptionalGroups { groups, description } => {
                assert_eq!(groups, ["cpu", "cuda"]);
                assert_eq!(description, "Pick one torch backend.");
            }
            other => panic!("unexpected error {other}"),
        }

        assert_eq!(
            names(set.select(&Extras::Named(vec!["cpu".into(), "docs".into()])).unwrap()),
            ["numpy", "torch-cpu", "sphinx"]
        );
        assert_eq!(
            names(set.select(&Extras::Named(vec!["dev".into()])).unwrap()),
            ["numpy", "torch-cuda", "sphinx"]
        );
    }

    #[test]
    fn buckets_follow_source_priority() {
        let deps = vec![
            Dependency::new("curl").with_install("apt", "curl"),
            Dependency::new("numpy").with_install("pip", "numpy"),
            Dependency::new("jq").with_install("apt", "jq"),
        ];
        let resolved = DependencyResolver::new(VariantSpace::empty())
            .resolve(&deps, &linux().with_source_priority(["pip", "apt"]))
            .unwrap();
        assert_eq!(resolved.sources(), ["pip", "apt"]);
        assert_eq!(
            resolved.names_by_source(),
            json!({"pip": ["numpy"], "apt": ["curl", "jq"]})
        );
        assert_eq!(resolved.dependency_count(), 3);
    }

    #[test]
    fn default_source_order_comes_from_platform() {
        let deps = vec![Dependency::new("git").with_install("apt", "git").with_install("brew", "git")];
        let resolved = DependencyResolver::new(VariantSpace::empty())
            .resolve(&deps, &linux())
            .unwrap();
        assert_eq!(resolved.sources(), ["apt"]);
    }

    #[test]
    fn conda_preferred_over_pip_by_default() {
        let deps = vec![Dependency::new("numpy").with_install("pip", "numpy").with_install("conda", "numpy")];
        let resolved = DependencyResolver::new(VariantSpace::empty())
            .resolve(&deps, &linux())
            .unwrap();
        assert_eq!(resolved.sources(), ["conda"]);
        assert_eq!(resolved.names_by_source(), json!({"conda": ["numpy"]}));
    }

    #[test]
    fn selector_sees_variants() {
        let space = VariantSpace::from_value(&json!({"variants": {"python": ["3.10", "3.12"]}})).unwrap();
        let deps = vec![
            Dependency::new("tomli")
                .with_install("pip", "tomli")
                .with_selector("python < 3.11"),
        ];
        let resolver = DependencyResolver::new(space);

        let old = resolver.resolve(&deps, &linux()).unwrap();
        assert_eq!(old.dependency_count(), 1);

        let new = resolver
            .resolve(&deps, &linux().with_override("python", "3.12"))
            .unwrap();
        assert!(new.is_empty());
        assert_eq!(new.variants().get("python"), Some(&json!("3.12")));
    }

    #[test]
    fn unknown_variant_reference_fails() {
        let deps = vec![Dependency::new("torch").with_install("pip", "torch").with_variants(["cuda"])];
        let err = DependencyResolver::new(VariantSpace::empty())
            .resolve(&deps, &linux())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownVariantDimension { .. }));
    }

    #[test]
    fn probes_only_run_when_excluding_installed() {
        struct Installed;
        impl InstallProbe for Installed {
            fn is_installed(&self, _: &Dependency, _: &str) -> bool {
                true
            }
        }

        let deps = vec![
            Dependency::new("numpy").with_install("pip", "numpy").with_probe("import numpy"),
            Dependency::new("rich").with_install("pip", "rich"),
        ];
        let resolver = DependencyResolver::new(VariantSpace::empty()).with_probe(Installed);

        let all = resolver.resolve(&deps, &linux()).unwrap();
        assert_eq!(all.dependency_count(), 2);

        let missing = resolver
            .resolve(&deps, &linux().with_exclude_installed(true))
            .unwrap();
        assert_eq!(missing.names_by_source(), json!({"pip": ["rich"]}));

        let probe_failed = DependencyResolver::new(VariantSpace::empty())
            .with_probe(NeverInstalled)
            .resolve(&deps, &linux().with_exclude_installed(true))
            .unwrap();
        assert_eq!(probe_failed.dependency_count(), 2);
    }

    #[test]
    fn serializes_as_source_map() {
        let deps = vec![Dependency::new("rich").with_install("pip", "rich")];
        let resolved = DependencyResolver::new(VariantSpace::empty())
            .resolve(&deps, &linux())
            .unwrap();
        assert_eq!(
            serde_json::to_value(&resolved).unwrap(),
            json!({"pip": [{"name": "rich", "install": {"pip": "rich"}}]})
        );
    }
}
