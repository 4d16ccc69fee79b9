//! Generate, classify and apply in one pass
//!
//! ```no_run
//! use ctl_core::pipeline::Compiler;
//! use ctl_core::sync::Synchronizer;
//! use ctl_fs::NormalizedPath;
//! use ctl_meta::SchemaRegistry;
//!
//! # fn main() -> ctl_core::Result<()> {
//! let registry = SchemaRegistry::empty();
//! let root = NormalizedPath::new("/work/project");
//! let outcome = Synchronizer::new(root.clone())
//!     .run(&Compiler::new(&registry), &root.join(".control"))?;
//! for line in outcome.report.lines() {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

use serde_json::Value;

use crate::apply::{ApplyEngine, ApplyReport};
use crate::copy::CopyEngine;
use crate::diff::{ChangePlan, ChangeReport, DiffEngine};
use crate::error::Result;
use crate::generate::{DeclaredFileGenerator, Generator, SnapshotGenerator};
use crate::hooks::{HookTable, Stage};
use crate::pipeline::{CompiledTree, Compiler};
use crate::snapshot::{DEFAULT_SNAPSHOT_NAME, PreviousState};
use ctl_fs::NormalizedPath;

/// Result of one synchronization
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The tree as left by the sync hooks
    pub tree: Value,
    pub plan: ChangePlan,
    pub report: ApplyReport,
}

impl SyncOutcome {
    /// Whether the filesystem already matched the configuration.
    pub fn is_noop(&self) -> bool {
        self.plan.is_noop()
    }
}

/// Drives generators, the [`DiffEngine`], the [`ApplyEngine`] and the
/// [`CopyEngine`] for one repository root
pub struct Synchronizer {
    root: NormalizedPath,
    generators: Vec<Box<dyn Generator>>,
    hooks: HookTable,
    dry_run: bool,
    unit_prefix: Option<String>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("root", &self.root)
            .field("generators", &self.generators.iter().map(|g| g.name()).collect::<Vec<_>>())
            .field("hooks", &self.hooks)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Synchronizer {
    /// Declared files and the snapshot, applied below `root`.
    pub fn new(root: impl Into<NormalizedPath>) -> Self {
        Self {
            root: root.into(),
            generators: vec![
                Box::new(DeclaredFileGenerator::default()),
                Box::new(SnapshotGenerator::default()),
            ],
            hooks: HookTable::new(),
            dry_run: false,
            unit_prefix: None,
        }
    }

    pub fn with_generators(mut self, generators: Vec<Box<dyn Generator>>) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_generator(mut self, generator: impl Generator + 'static) -> Self {
        self.generators.push(Box::new(generator));
        self
    }

    /// Hooks for `output_generation`, `synchronization` and `finalization`.
    pub fn with_hooks(mut self, hooks: HookTable) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_unit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.unit_prefix = Some(prefix.into());
        self
    }

    pub fn root(&self) -> &NormalizedPath {
        &self.root
    }

    fn diff_engine(&self) -> DiffEngine {
        let engine = DiffEngine::new(self.root.clone());
        match &self.unit_prefix {
            Some(prefix) => engine.with_unit_prefix(prefix),
            None => engine,
        }
    }

    /// Compile `control_dir` and synchronize against the snapshot stored in it.
    pub fn run(&self, compiler: &Compiler<'_>, control_dir: &NormalizedPath) -> Result<SyncOutcome> {
        let previous = PreviousState::load(&control_dir.join(DEFAULT_SNAPSHOT_NAME))?;
        let compiled = compiler.compile(control_dir)?;
        self.sync(&compiled, &previous)
    }

    /// Plan without applying.
    pub fn plan(&self, compiled: &CompiledTree, previous: &PreviousState) -> Result<ChangePlan> {
        let mut entities = Vec::new();
        for generator in &self.generators {
            let generated = generator.generate(compiled, previous)?;
            tracing::debug!(generator = generator.name(), count = generated.len(), "Generated entities");
            entities.extend(generated);
        }
        self.diff_engine().plan(compiled, previous, entities)
    }

    /// Human summary of what [`Synchronizer::sync`] would change.
    pub fn preview(&self, compiled: &CompiledTree, previous: &PreviousState) -> Result<ChangeReport> {
        self.plan(compiled, previous)?.report(&self.root)
    }

    pub fn sync(&self, compiled: &CompiledTree, previous: &PreviousState) -> Result<SyncOutcome> {
        let mut plan = self.plan(compiled, previous)?;
        let mut tree = compiled.tree.clone();

        self.hooks.run(Stage::OutputGeneration, &mut tree, &mut plan.entities)?;
        let engine = self.diff_engine();
        for entity in &mut plan.entities {
            if entity.change.is_none() && !entity.is_dir() {
                *entity = engine.classify_file(entity.clone())?;
            }
        }
        self.hooks.run(Stage::Synchronization, &mut tree, &mut plan.entities)?;

        let mut report = ApplyEngine::new(self.root.clone())
            .dry_run(self.dry_run)
            .apply(&plan)?;
        let copies = CopyEngine::new(self.root.clone())
            .dry_run(self.dry_run)
            .apply(&tree, previous.tree())?;
        report.actions.extend(copies);

        self.hooks.run(Stage::Finalization, &mut tree, &mut plan.entities)?;
        tracing::info!(
            changes = plan.changes().count(),
            dry_run = self.dry_run,
            "Synchronization finished"
        );
        Ok(SyncOutcome { tree, plan, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ChangeKind, GeneratedEntity};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn compiled() -> CompiledTree {
        CompiledTree::from_tree(json!({
            "control": {"path": ".control"},
            "file_readme": {"path": "README.md", "content": "# demo"},
        }))
    }

    #[test]
    fn second_sync_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let sync = Synchronizer::new(dir.path());

        let first = sync.sync(&compiled(), &PreviousState::empty()).unwrap();
        assert!(!first.is_noop());
        assert_eq!(fs::read_to_string(dir.path().join("README.md")).unwrap(), "# demo\n");
        assert!(dir.path().join(".control/metadata.json").is_file());

        let previous = PreviousState::load(&NormalizedPath::new(dir.path().join(".control/metadata.json"))).unwrap();
        let second = sync.sync(&compiled(), &previous).unwrap();
        assert!(second.is_noop(), "{:?}", second.report);
        assert!(second.report.is_empty());
    }

    #[test]
    fn dry_run_preview_and_no_writes() {
        let dir = TempDir::new().unwrap();
        let sync = Synchronizer::new(dir.path()).dry_run(true);

        let preview = sync.preview(&compiled(), &PreviousState::empty()).unwrap();
        assert!(preview.to_string().contains("ADDED          README.md"), "{preview}");

        let outcome = sync.sync(&compiled(), &PreviousState::empty()).unwrap();
        assert!(outcome.report.dry_run);
        assert!(!dir.path().join("README.md").exists());
    }

    #[test]
    fn hooks_can_add_entities() {
        let dir = TempDir::new().unwrap();
        let stages = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&stages);
        let hooks = HookTable::new()
            .with(Stage::OutputGeneration, |payload| {
                payload
                    .entities
                    .push(GeneratedEntity::file("extra", "Extra").with_path("EXTRA.txt").with_content("x"));
                Ok(())
            })
            .with(Stage::Finalization, move |payload| {
                seen.borrow_mut().push(payload.stage);
                Ok(())
            });

        let outcome = Synchronizer::new(dir.path())
            .with_hooks(hooks)
            .sync(&compiled(), &PreviousState::empty())
            .unwrap();
        let extra = outcome.plan.entities.iter().find(|e| e.subtype.id == "extra").unwrap();
        assert_eq!(extra.change, Some(ChangeKind::Added));
        assert!(dir.path().join("EXTRA.txt").is_file());
        assert_eq!(*stages.borrow(), vec![Stage::Finalization]);
    }

    #[test]
    fn generated_file_is_duplicated_after_apply() {
        let dir = TempDir::new().unwrap();
        let sync = Synchronizer::new(dir.path());
        let compiled = CompiledTree::from_tree(json!({
            "control": {"path": ".control"},
            "file_readme": {"path": "README.md", "content": "# demo"},
            "copy_readme": {"source": "README.md", "destinations": ["docs/index.md"]},
        }));

        let first = sync.sync(&compiled, &PreviousState::empty()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("docs/index.md")).unwrap(), "# demo\n");
        assert_eq!(
            first.report.lines().last().map(String::as_str),
            Some("copy README.md -> docs/index.md")
        );

        let previous = PreviousState::from_tree(compiled.tree.clone());
        let second = sync.sync(&compiled, &previous).unwrap();
        assert!(second.report.is_empty(), "{:?}", second.report.lines());
    }

    #[test]
    fn failing_hook_stops_before_apply() {
        let dir = TempDir::new().unwrap();
        let hooks = HookTable::new().with(Stage::Synchronization, |_| Err("blocked".into()));
        let err = Synchronizer::new(dir.path())
            .with_hooks(hooks)
            .sync(&compiled(), &PreviousState::empty())
            .unwrap_err();
        assert_eq!(err.report().stage, Some(Stage::Synchronization));
        assert!(!dir.path().join("README.md").exists());
    }
}
