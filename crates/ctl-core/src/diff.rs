//! Change classification
//!
//! Compares the new compile with the previous one and the live filesystem.
//! Files are classified from their new and previous paths plus the content on
//! disk. Directories come from package units (root, source, import) and the
//! control directory; a unit's paths are classified root first so that a
//! renamed root carries its children along.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::entity::{ChangeKind, EntityType, GeneratedEntity};
use crate::error::Result;
use crate::pipeline::CompiledTree;
use crate::snapshot::PreviousState;
use ctl_content::{ScalarDiff, unified_text_diff};
use ctl_fs::{NormalizedPath, io};

/// Entities to reconcile plus the structural diff of the two trees
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangePlan {
    /// Directories first, in dependency order, then files
    pub entities: Vec<GeneratedEntity>,
    pub scalar_diff: ScalarDiff,
}

impl ChangePlan {
    pub fn directories(&self) -> impl Iterator<Item = &GeneratedEntity> {
        self.entities.iter().filter(|e| e.is_dir())
    }

    pub fn files(&self) -> impl Iterator<Item = &GeneratedEntity> {
        self.entities.iter().filter(|e| !e.is_dir())
    }

    /// Entities whose application touches the filesystem.
    pub fn changes(&self) -> impl Iterator<Item = &GeneratedEntity> {
        self.entities.iter().filter(|e| e.change_kind().is_change())
    }

    /// Whether applying the plan would do nothing.
    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }

    /// Summary lines and text diffs, reading old content below `root`.
    pub fn report(&self, root: &NormalizedPath) -> Result<ChangeReport> {
        let mut entries = Vec::new();
        let mut diffs = Vec::new();
        for entity in &self.entities {
            let change = entity.change_kind();
            if !change.is_change() {
                continue;
            }
            entries.push(ReportEntry {
                change,
                entity_type: entity.entity_type,
                subtype: entity.subtype.id.clone(),
                path: entity.path.as_ref().map(ToString::to_string),
                path_before: entity.path_before.as_ref().map(ToString::to_string),
            });

            if entity.is_dir() {
                continue;
            }
            let old = match (&entity.path_before, change) {
                (_, ChangeKind::Added) => String::new(),
                (Some(before), _) => io::read_text_if_exists(&root.join(before.as_str()))?.unwrap_or_default(),
                (None, _) => match &entity.path {
                    Some(path) => io::read_text_if_exists(&root.join(path.as_str()))?.unwrap_or_default(),
                    None => String::new(),
                },
            };
            let new = match change {
                ChangeKind::Removed => String::new(),
                _ => entity.content.clone().unwrap_or_default(),
            };
            let (old, new) = (normalize(&old), normalize(&new));
            if old != new {
                let old_label = entity.path_before.as_ref().or(entity.path.as_ref());
                let new_label = entity.path.as_ref().or(entity.path_before.as_ref());
                diffs.push(FileDiff {
                    path: entity.display_path(),
                    diff: unified_text_diff(
                        &old,
                        &new,
                        &label(old_label),
                        &label(new_label),
                    ),
                });
            }
        }
        Ok(ChangeReport {
            entries,
            diffs,
            scalar_diff: self.scalar_diff.clone(),
        })
    }
}

fn label(path: Option<&NormalizedPath>) -> String {
    path.map_or_else(|| "/dev/null".to_string(), ToString::to_string)
}

fn normalize(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

/// One changed entity in a [`ChangeReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub change: ChangeKind,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub subtype: String,
    pub path: Option<String>,
    pub path_before: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub diff: String,
}

/// Human-readable account of a [`ChangePlan`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeReport {
    pub entries: Vec<ReportEntry>,
    pub diffs: Vec<FileDiff>,
    pub scalar_diff: ScalarDiff,
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            writeln!(f, "No changes.")?;
        }
        for entry in &self.entries {
            match (&entry.path_before, &entry.path) {
                (Some(before), Some(path)) if before != path => {
                    writeln!(f, "{:<14} {before} -> {path}", entry.change.as_str())?
                }
                (_, Some(path)) => writeln!(f, "{:<14} {path}", entry.change.as_str())?,
                (Some(before), None) => writeln!(f, "{:<14} {before}", entry.change.as_str())?,
                (None, None) => {}
            }
        }
        for diff in &self.diffs {
            write!(f, "\n{}", diff.diff)?;
        }
        Ok(())
    }
}

/// Classifies generated entities and unit directories against the filesystem
#[derive(Debug, Clone)]
pub struct DiffEngine {
    root: NormalizedPath,
    unit_prefix: String,
}

impl DiffEngine {
    pub fn new(root: impl Into<NormalizedPath>) -> Self {
        Self {
            root: root.into(),
            unit_prefix: "pypkg_".to_string(),
        }
    }

    pub fn with_unit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.unit_prefix = prefix.into();
        self
    }

    pub fn root(&self) -> &NormalizedPath {
        &self.root
    }

    /// Classify everything and diff the trees.
    pub fn plan(
        &self,
        compiled: &CompiledTree,
        previous: &PreviousState,
        entities: Vec<GeneratedEntity>,
    ) -> Result<ChangePlan> {
        let mut planned = self.directories(&compiled.tree, previous.tree());
        for entity in entities {
            planned.push(self.classify_file(entity)?);
        }
        let plan = ChangePlan {
            entities: planned,
            scalar_diff: ScalarDiff::compute(previous.tree(), &compiled.tree),
        };
        tracing::debug!(
            entities = plan.entities.len(),
            changes = plan.changes().count(),
            "Change plan ready"
        );
        Ok(plan)
    }

    fn on_disk(&self, path: &NormalizedPath) -> NormalizedPath {
        self.root.join(path.as_str())
    }

    /// Same trimmed content, and the executable bit set when the entity asks for it.
    fn same_output(&self, path: &NormalizedPath, entity: &GeneratedEntity) -> Result<bool> {
        let on_disk = self.on_disk(path);
        let existing = io::read_text_if_exists(&on_disk)?;
        let content = entity.content.as_deref().unwrap_or("").trim();
        if !existing.is_some_and(|text| text.trim() == content) {
            return Ok(false);
        }
        Ok(!entity.executable || io::is_executable(&on_disk)?)
    }

    /// Classify one file entity. A preset classification is kept.
    pub fn classify_file(&self, mut entity: GeneratedEntity) -> Result<GeneratedEntity> {
        if entity.change.is_some() {
            return Ok(entity);
        }
        let change = match (&entity.path, &entity.path_before) {
            (None, None) => ChangeKind::Disabled,
            (None, Some(before)) => {
                if self.on_disk(before).is_file() {
                    ChangeKind::Removed
                } else {
                    ChangeKind::Disabled
                }
            }
            (Some(path), Some(before)) if self.on_disk(before).is_file() => {
                match (path == before, self.same_output(before, &entity)?) {
                    (true, true) => ChangeKind::Unchanged,
                    (true, false) => ChangeKind::Modified,
                    (false, true) => ChangeKind::Moved,
                    (false, false) => ChangeKind::MovedModified,
                }
            }
            (Some(path), _) => {
                if !self.on_disk(path).is_file() {
                    ChangeKind::Added
                } else if self.same_output(path, &entity)? {
                    ChangeKind::Unchanged
                } else {
                    ChangeKind::Modified
                }
            }
        };
        tracing::debug!(path = %entity.display_path(), %change, "Classified file");
        entity.change = Some(change);
        Ok(entity)
    }

    /// Directory entities for the control directory and every unit.
    pub fn directories(&self, new: &Value, previous: &Value) -> Vec<GeneratedEntity> {
        let mut out = Vec::new();

        let control = DirPaths::top_level(str_at(new, &["control", "path"]), str_at(previous, &["control", "path"]));
        out.push(self.classify_dir("control", "Control directory", &control));

        let mut units: Vec<&String> = [new, previous]
            .into_iter()
            .filter_map(Value::as_object)
            .flat_map(|map| map.keys())
            .filter(|key| key.starts_with(&self.unit_prefix))
            .collect();
        units.sort();
        units.dedup();

        for unit in units {
            let new_paths = UnitPaths::read(new.get(unit.as_str()));
            let old_paths = UnitPaths::read(previous.get(unit.as_str()));

            let root = DirPaths::top_level(new_paths.root.clone(), old_paths.root.clone());
            let source = DirPaths::nested(
                new_paths.source(),
                old_paths.source(),
                new_paths.root.as_ref(),
                old_paths.source_rel.as_deref(),
            );
            let import = DirPaths::nested(
                new_paths.import(),
                old_paths.import(),
                new_paths.source().as_ref(),
                old_paths.import_rel.as_deref(),
            );

            out.push(self.classify_dir(&format!("{unit}.root"), "Package root", &root));
            out.push(self.classify_dir(&format!("{unit}.source"), "Source directory", &source));
            out.push(self.classify_dir(&format!("{unit}.import"), "Import package", &import));
        }
        out
    }

    fn classify_dir(&self, id: &str, display: &str, paths: &DirPaths) -> GeneratedEntity {
        let mut entity = GeneratedEntity::directory(id, display);
        let new_exists = paths.new.as_ref().is_some_and(|p| self.on_disk(p).is_dir());
        let old_exists = paths.old.as_ref().is_some_and(|p| self.on_disk(p).is_dir());

        let change = match (&paths.new, &paths.rebased) {
            (Some(new), Some(rebased)) if new == rebased => {
                entity = entity.with_path(new.clone()).with_path_before(rebased.clone());
                if new_exists || old_exists {
                    ChangeKind::Unchanged
                } else {
                    ChangeKind::Added
                }
            }
            (Some(new), Some(rebased)) => {
                entity = entity.with_path(new.clone());
                if old_exists {
                    entity = entity.with_path_before(rebased.clone());
                    ChangeKind::Moved
                } else if new_exists {
                    ChangeKind::Unchanged
                } else {
                    ChangeKind::Added
                }
            }
            (Some(new), None) => {
                entity = entity.with_path(new.clone());
                if new_exists {
                    ChangeKind::Unchanged
                } else {
                    ChangeKind::Added
                }
            }
            (None, Some(_)) => match &paths.old {
                Some(old) if old_exists => {
                    entity = entity.with_path_before(old.clone());
                    ChangeKind::Removed
                }
                _ => ChangeKind::Disabled,
            },
            (None, None) => ChangeKind::Disabled,
        };
        tracing::debug!(directory = id, %change, "Classified directory");
        entity.with_change(change)
    }
}

fn str_at(tree: &Value, keys: &[&str]) -> Option<NormalizedPath> {
    keys.iter()
        .try_fold(tree, |node, key| node.get(*key))
        .and_then(Value::as_str)
        .map(NormalizedPath::new)
}

/// Path fields of one unit in one tree
#[derive(Debug, Default)]
struct UnitPaths {
    root: Option<NormalizedPath>,
    source: Option<NormalizedPath>,
    source_rel: Option<String>,
    import: Option<NormalizedPath>,
    import_rel: Option<String>,
}

impl UnitPaths {
    fn read(unit: Option<&Value>) -> Self {
        let Some(unit) = unit else {
            return Self::default();
        };
        let field = |key: &str| str_at(unit, &["path", key]);
        let root = field("root");
        let source = field("source");
        let import = field("import");
        let source_rel = field("source_rel")
            .map(|p| p.to_string())
            .or_else(|| Some(source.as_ref()?.relative_to(root.as_ref()?)?).filter(|s| !s.is_empty()));
        let import_rel = field("import_rel")
            .map(|p| p.to_string())
            .or_else(|| Some(import.as_ref()?.relative_to(source.as_ref()?)?).filter(|s| !s.is_empty()));
        Self {
            root,
            source,
            source_rel,
            import,
            import_rel,
        }
    }

    /// Source path, derived from the root of the same tree when not stored.
    fn source(&self) -> Option<NormalizedPath> {
        let root = self.root.as_ref()?;
        self.source_rel
            .as_deref()
            .map(|rel| root.join(rel))
            .or_else(|| self.source.clone())
    }

    fn import(&self) -> Option<NormalizedPath> {
        let source = self.source()?;
        self.import_rel
            .as_deref()
            .map(|rel| source.join(rel))
            .or_else(|| self.import.clone())
    }
}

/// New path, old path as it is on disk now, and old path rebased onto the
/// new parent
#[derive(Debug)]
struct DirPaths {
    new: Option<NormalizedPath>,
    old: Option<NormalizedPath>,
    rebased: Option<NormalizedPath>,
}

impl DirPaths {
    fn top_level(new: Option<NormalizedPath>, old: Option<NormalizedPath>) -> Self {
        Self {
            new,
            rebased: old.clone(),
            old,
        }
    }

    fn nested(
        new: Option<NormalizedPath>,
        old: Option<NormalizedPath>,
        new_parent: Option<&NormalizedPath>,
        old_name: Option<&str>,
    ) -> Self {
        let rebased = match (new_parent, old_name) {
            (Some(parent), Some(name)) => Some(parent.join(name)),
            _ => old.clone(),
        };
        Self { new, old, rebased }
    }
}
