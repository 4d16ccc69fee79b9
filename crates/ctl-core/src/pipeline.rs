//! The compile pipeline
//!
//! `load → validate(pre, defaults) → augment → validate(pre) → fill →
//! validate(post) + invariants`, with lifecycle hooks between the steps.
//! Every failure is attributed to the stage it happened in.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Value, json};

use crate::augment::{AugmentStep, default_steps};
use crate::cache::{CacheStore, DEFAULT_RETENTION_HOURS};
use crate::entity::GeneratedEntity;
use crate::error::{Error, Result};
use crate::external::{ExternalResolver, FileFetcher, Fetcher};
use crate::hooks::{HookTable, Stage};
use crate::loader::{DEFAULT_HOOKS_DIR, Loader};
use crate::store::{DEFAULT_TEMP_KEY, NestedStore};
use crate::template::TemplateContext;
use ctl_content::{MergePolicy, get_at_path, merge, parse_path};
use ctl_fs::NormalizedPath;
use ctl_meta::{EmbeddedSchemas, InvariantSet, InvariantViolation, Phase, SchemaRegistry, Validator};

/// Settings of one [`Compiler`]
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Directory below the control directory that is not loaded
    pub hooks_dir: String,
    pub merge_policy: MergePolicy,
    /// Helper key stripped from the compiled tree
    pub temp_key: String,
    /// Subtrees left unresolved, in addition to embedded schemas
    pub skip_patterns: Vec<String>,
    /// Registered schema for the whole tree; unvalidated when unset
    pub root_schema: Option<String>,
    pub embedded: EmbeddedSchemas,
    pub invariants: InvariantSet,
    /// Persistent cache file; in memory when unset
    pub cache_path: Option<NormalizedPath>,
    pub cache_retention: BTreeMap<String, u64>,
    pub default_retention: u64,
    pub context: TemplateContext,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            hooks_dir: DEFAULT_HOOKS_DIR.to_string(),
            merge_policy: MergePolicy::Strict,
            temp_key: DEFAULT_TEMP_KEY.to_string(),
            skip_patterns: Vec::new(),
            root_schema: None,
            embedded: EmbeddedSchemas::default(),
            invariants: InvariantSet::standard(None),
            cache_path: None,
            cache_retention: BTreeMap::new(),
            default_retention: DEFAULT_RETENTION_HOURS,
            context: TemplateContext::with_builtins(),
        }
    }
}

impl CompilerOptions {
    pub fn with_hooks_dir(mut self, hooks_dir: impl Into<String>) -> Self {
        self.hooks_dir = hooks_dir.into();
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn with_temp_key(mut self, key: impl Into<String>) -> Self {
        self.temp_key = key.into();
        self
    }

    pub fn with_skip_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.skip_patterns.push(pattern.into());
        self
    }

    pub fn with_root_schema(mut self, name: impl Into<String>) -> Self {
        self.root_schema = Some(name.into());
        self
    }

    pub fn with_embedded(mut self, embedded: EmbeddedSchemas) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn with_invariants(mut self, invariants: InvariantSet) -> Self {
        self.invariants = invariants;
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<NormalizedPath>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_cache_retention(mut self, category: impl Into<String>, hours: u64) -> Self {
        self.cache_retention.insert(category.into(), hours);
        self
    }

    pub fn with_default_retention(mut self, hours: u64) -> Self {
        self.default_retention = hours;
        self
    }

    pub fn with_context(mut self, context: TemplateContext) -> Self {
        self.context = context;
        self
    }

    fn open_cache(&self) -> CacheStore {
        let cache = match &self.cache_path {
            Some(path) => CacheStore::open(path.clone()),
            None => CacheStore::in_memory(),
        };
        self.cache_retention
            .iter()
            .fold(cache.with_default_retention(self.default_retention), |cache, (category, hours)| {
                cache.with_retention(category.clone(), *hours)
            })
    }
}

/// Result of a successful compile
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTree {
    pub tree: Value,
    /// Files each top-level key was loaded from
    pub sources: BTreeMap<String, Vec<String>>,
    /// Log-only invariant violations
    pub warnings: Vec<InvariantViolation>,
}

impl CompiledTree {
    /// A compiled tree with no provenance, e.g. for tests and generators.
    pub fn from_tree(tree: Value) -> Self {
        Self {
            tree,
            sources: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_at_path(&self.tree, &parse_path(path))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Top-level entries whose key starts with `prefix`, sorted.
    pub fn entries_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.tree
            .as_object()
            .into_iter()
            .flat_map(|map| map.iter())
            .filter(move |(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.as_str(), value))
    }
}

/// Compiles a control directory into a [`CompiledTree`]
pub struct Compiler<'r> {
    registry: &'r SchemaRegistry,
    options: CompilerOptions,
    hooks: HookTable,
    steps: Vec<Box<dyn AugmentStep>>,
    fetcher: Option<Rc<dyn Fetcher>>,
}

impl fmt::Debug for Compiler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("options", &self.options)
            .field("hooks", &self.hooks)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            options: CompilerOptions::default(),
            hooks: HookTable::new(),
            steps: default_steps(),
            fetcher: None,
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hooks(mut self, hooks: HookTable) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the augmentation steps.
    pub fn with_steps(mut self, steps: Vec<Box<dyn AugmentStep>>) -> Self {
        self.steps = steps;
        self
    }

    /// Append an augmentation step after the current ones.
    pub fn with_step(mut self, step: impl AugmentStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Fetcher for `!ext` references. Defaults to files relative to the control directory.
    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Rc::new(fetcher));
        self
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    /// Compile every document below `control_dir`.
    pub fn compile(&self, control_dir: &NormalizedPath) -> Result<CompiledTree> {
        tracing::info!(dir = %control_dir, "Compiling control center");
        let mut entities: Vec<GeneratedEntity> = Vec::new();

        let mut seed = json!({});
        self.run_hooks(Stage::Initialization, &mut seed, &mut entities)?;

        let mut resolver = match &self.fetcher {
            Some(fetcher) => ExternalResolver::new(Rc::clone(fetcher), self.options.open_cache()),
            None => ExternalResolver::new(FileFetcher::new(control_dir.clone()), self.options.open_cache()),
        };
        let loaded = Loader::new()
            .with_hooks_dir(&self.options.hooks_dir)
            .with_policy(self.options.merge_policy)
            .load(control_dir, &mut resolver)
            .map_err(|e| e.in_stage(Stage::Load))?;
        // Loaded documents override values seeded by initialization hooks
        let mut tree = merge(seed, loaded.tree, MergePolicy::Overlay).map_err(|conflict| {
            Error::Load {
                path: conflict.path.clone(),
                message: conflict.to_string(),
            }
            .in_stage(Stage::Load)
        })?;
        self.run_hooks(Stage::Load, &mut tree, &mut entities)?;

        self.validate(&mut tree, Phase::PreSubstitution, true)
            .map_err(|e| e.in_stage(Stage::LoadValidation))?;
        self.run_hooks(Stage::LoadValidation, &mut tree, &mut entities)?;

        let mut skip = self.options.embedded.schema_patterns();
        skip.extend(self.options.skip_patterns.iter().cloned());
        let mut store = NestedStore::new(tree)
            .with_context(self.options.context.clone())
            .with_skip_patterns(skip)
            .with_temp_key(&self.options.temp_key);

        for step in &self.steps {
            tracing::debug!(step = step.name(), "Running augmentation step");
            step.apply(&mut store)
                .map_err(|e| e.in_stage(Stage::Augmentation))?;
        }
        self.run_hooks(Stage::Augmentation, store.tree_mut(), &mut entities)?;

        self.validate(store.tree_mut(), Phase::PreSubstitution, false)
            .map_err(|e| e.in_stage(Stage::AugmentationValidation))?;
        self.run_hooks(Stage::AugmentationValidation, store.tree_mut(), &mut entities)?;

        store
            .fill(None)
            .map_err(|e| e.in_stage(Stage::Templating))?;
        store.strip_transient();
        let mut tree = store.into_tree();
        self.run_hooks(Stage::Templating, &mut tree, &mut entities)?;

        self.validate(&mut tree, Phase::PostSubstitution, false)
            .map_err(|e| e.in_stage(Stage::TemplatingValidation))?;
        let warnings = self
            .options
            .invariants
            .check(&tree)
            .map_err(|e| Error::from(e).in_stage(Stage::TemplatingValidation))?;
        self.run_hooks(Stage::TemplatingValidation, &mut tree, &mut entities)?;

        if let Err(e) = resolver.cache_mut().save() {
            tracing::warn!(error = %e, "Failed to save cache");
        }

        tracing::info!(keys = loaded.sources.len(), warnings = warnings.len(), "Compile finished");
        Ok(CompiledTree {
            tree,
            sources: loaded.sources,
            warnings,
        })
    }

    fn run_hooks(&self, stage: Stage, tree: &mut Value, entities: &mut Vec<GeneratedEntity>) -> Result<()> {
        self.hooks.run(stage, tree, entities)
    }

    fn validate(&self, tree: &mut Value, phase: Phase, fill_defaults: bool) -> Result<()> {
        if let Some(name) = &self.options.root_schema {
            Validator::new(self.registry, phase)
                .with_fill_defaults(fill_defaults)
                .validate_named(tree, name)?;
        }
        let checked = self.options.embedded.validate(self.registry, tree, phase)?;
        tracing::debug!(%phase, embedded = checked, "Validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn control(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::build([(
            "control",
            json!({
                "type": "object",
                "properties": {
                    "project": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "typed": {"type": "boolean", "default": false},
                        },
                    },
                },
            }),
        )])
        .unwrap()
    }

    #[test]
    fn compiles_templates_defaults_and_augmentation() {
        let dir = control(&[
            ("project.yaml", "project:\n  name: demo\n  typed: \"${{ flags.typed }}\"\nflags:\n  typed: true\n"),
            ("pkg.yaml", "pypkg_main:\n  path:\n    root: \"${{ project.name }}\"\n    source_rel: src\n"),
        ]);
        let registry = schemas();
        let compiled = Compiler::new(&registry)
            .with_options(CompilerOptions::default().with_root_schema("control"))
            .compile(&NormalizedPath::new(dir.path()))
            .unwrap();

        assert_eq!(compiled.get("project.typed"), Some(&json!(true)));
        assert_eq!(compiled.get_str("pypkg_main.path.source"), Some("demo/src"));
        assert_eq!(compiled.sources["pypkg_main"], ["pkg.yaml"]);
        assert!(compiled.warnings.is_empty());
    }

    #[test]
    fn resolved_type_mismatch_fails_post_validation() {
        let dir = control(&[("a.yaml", "project:\n  typed: \"${{ flags.mode }}\"\nflags:\n  mode: strict\n")]);
        let registry = schemas();
        let err = Compiler::new(&registry)
            .with_options(CompilerOptions::default().with_root_schema("control"))
            .compile(&NormalizedPath::new(dir.path()))
            .unwrap_err();

        let report = err.report();
        assert_eq!(report.stage, Some(Stage::TemplatingValidation));
        assert_eq!(report.path.as_deref(), Some("project.typed"));
    }

    #[test]
    fn failures_carry_their_stage() {
        let registry = SchemaRegistry::empty();
        let cases = [
            ("a.yaml", "x: \"${{ y }}\"\ny: \"${{ x }}\"\n", Stage::Templating),
            ("a.yaml", "x: [unterminated\n", Stage::Load),
            ("a.yaml", "env_a:\n  dependencies: [{name: n, install: {pip: n}}]\n  platform: nope-64\n", Stage::Augmentation),
            ("a.yaml", "control:\n  path: .ctl\npypkg_a:\n  path:\n    root: .ctl/a\n", Stage::TemplatingValidation),
        ];
        for (file, content, stage) in cases {
            let dir = control(&[(file, content)]);
            let err = Compiler::new(&registry)
                .compile(&NormalizedPath::new(dir.path()))
                .unwrap_err();
            assert_eq!(err.report().stage, Some(stage), "{content}: {err}");
        }
    }

    #[test]
    fn hooks_see_each_stage() {
        let dir = control(&[("a.yaml", "name: demo\n")]);
        let registry = SchemaRegistry::empty();
        let hooks = HookTable::new()
            .with(Stage::Load, |payload| {
                payload.tree["loaded"] = json!("${{ name }}");
                Ok(())
            })
            .with(Stage::Templating, |payload| {
                assert_eq!(payload.tree["loaded"], json!("demo"));
                payload.tree["__temp__"] = json!("added after stripping");
                Ok(())
            });

        let compiled = Compiler::new(&registry)
            .with_hooks(hooks)
            .compile(&NormalizedPath::new(dir.path()))
            .unwrap();
        assert_eq!(compiled.get("loaded"), Some(&json!("demo")));
        assert_eq!(compiled.get("__temp__"), Some(&json!("added after stripping")));
    }

    #[test]
    fn initialization_hooks_seed_the_tree() {
        let dir = control(&[("a.yaml", "name: demo
project:
  title: Demo
")]);
        let registry = SchemaRegistry::empty();
        let hooks = HookTable::new().with(Stage::Initialization, |payload| {
            payload.tree["project"] = json!({"title": "Seeded", "license": "MIT"});
            payload.tree["owner"] = json!("${{ name }}-team");
            Ok(())
        });

        let compiled = Compiler::new(&registry)
            .with_hooks(hooks)
            .compile(&NormalizedPath::new(dir.path()))
            .unwrap();
        assert_eq!(compiled.get_str("project.title"), Some("Demo"));
        assert_eq!(compiled.get_str("project.license"), Some("MIT"));
        assert_eq!(compiled.get_str("owner"), Some("demo-team"));
    }

    #[test]
    fn hook_failure_aborts_compile() {
        let dir = control(&[("a.yaml", "name: demo\n")]);
        let registry = SchemaRegistry::empty();
        let err = Compiler::new(&registry)
            .with_hooks(HookTable::new().with(Stage::AugmentationValidation, |_| Err("no license".into())))
            .compile(&NormalizedPath::new(dir.path()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Hook failed during augmentation_validation: no license");
    }

    #[test]
    fn cache_is_persisted_after_compile() {
        let dir = control(&[
            ("data/meta.json", r#"{"license": "MIT"}"#),
            ("a.yaml", "license: !ext \"data/meta.json license\"\n"),
        ]);
        let cache_file = dir.path().join("cache.yaml");
        let registry = SchemaRegistry::empty();
        let compiled = Compiler::new(&registry)
            .with_options(CompilerOptions::default().with_cache_path(cache_file.as_path()))
            .compile(&NormalizedPath::new(dir.path()))
            .unwrap();

        assert_eq!(compiled.get_str("license"), Some("MIT"));
        let cached = fs::read_to_string(cache_file).unwrap();
        assert!(cached.contains("data/meta.json license"), "{cached}");
    }
}
