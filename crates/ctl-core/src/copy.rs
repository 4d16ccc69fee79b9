//! Repository files duplicated by `copy_*` entries
//!
//! An entry copies one `source` file to each of its `destinations`, or every
//! file matched by its `sources` globs into each destination directory under
//! the file's own name. Copies run after the change plan is applied, so
//! sources may be generated files. Destinations that an earlier sync wrote
//! and the current configuration no longer names are removed.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::apply::{Action, AppliedAction};
use crate::error::{Error, Result};
use ctl_content::segment_matches;
use ctl_fs::NormalizedPath;
use ctl_fs::checksum::compute_content_checksum;
use ctl_fs::io;

pub const DEFAULT_COPY_PREFIX: &str = "copy_";

/// One `copy_*` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CopyRule {
    #[serde(default)]
    pub source: Option<String>,
    /// Globs relative to the repository root; `*` matches within one segment
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<String>,
}

impl CopyRule {
    /// `(source, destination)` pairs, relative to `root`.
    ///
    /// Glob matches are taken from the disk as it is now.
    pub fn pairs(&self, root: &NormalizedPath) -> Result<Vec<(NormalizedPath, NormalizedPath)>> {
        let mut out = Vec::new();
        if let Some(source) = &self.source {
            let source = NormalizedPath::new(source);
            for destination in &self.destinations {
                out.push((source.clone(), NormalizedPath::new(destination)));
            }
            return Ok(out);
        }
        for pattern in &self.sources {
            for source in expand_glob(root, pattern)? {
                let Some(name) = source.file_name() else { continue };
                for destination in &self.destinations {
                    out.push((source.clone(), NormalizedPath::new(destination).join(name)));
                }
            }
        }
        Ok(out)
    }
}

/// Every entry of `tree` whose key starts with `prefix`, in key order.
pub fn copy_rules(tree: &Value, prefix: &str) -> Result<Vec<(String, CopyRule)>> {
    let Some(map) = tree.as_object() else {
        return Ok(Vec::new());
    };
    let mut rules = Vec::new();
    for (key, value) in map.iter().filter(|(key, _)| key.starts_with(prefix)) {
        let rule: CopyRule = serde_json::from_value(value.clone()).map_err(|e| Error::Reconciliation {
            path: key.clone(),
            message: format!("invalid copy entry: {e}"),
        })?;
        if rule.source.is_none() && rule.sources.is_empty() {
            return Err(Error::Reconciliation {
                path: key.clone(),
                message: "copy entry needs 'source' or 'sources'".into(),
            });
        }
        rules.push((key.clone(), rule));
    }
    Ok(rules)
}

/// Files below `root` whose relative path matches `pattern` segment by segment.
fn expand_glob(root: &NormalizedPath, pattern: &str) -> Result<Vec<NormalizedPath>> {
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Ok(Vec::new());
    }
    let walker = WalkDir::new(root.to_native())
        .min_depth(1)
        .max_depth(segments.len())
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let depth = entry.depth();
            depth == 0
                || entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| segment_matches(segments[depth - 1], name))
        });

    let mut matches = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| Error::Reconciliation {
            path: pattern.to_string(),
            message: e.to_string(),
        })?;
        if entry.depth() != segments.len() || !entry.file_type().is_file() {
            continue;
        }
        if let Some(relative) = NormalizedPath::new(entry.path()).relative_to(root) {
            matches.push(NormalizedPath::new(relative));
        }
    }
    Ok(matches)
}

/// Performs the copies declared in a configuration tree
#[derive(Debug, Clone)]
pub struct CopyEngine {
    root: NormalizedPath,
    prefix: String,
    dry_run: bool,
}

impl CopyEngine {
    pub fn new(root: impl Into<NormalizedPath>) -> Self {
        Self {
            root: root.into(),
            prefix: DEFAULT_COPY_PREFIX.to_string(),
            dry_run: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Remove stale destinations of `previous`, then copy every source of
    /// `current` whose destination differs from it.
    pub fn apply(&self, current: &Value, previous: &Value) -> Result<Vec<AppliedAction>> {
        let mut wanted = Vec::new();
        for (key, rule) in copy_rules(current, &self.prefix)? {
            for (source, destination) in rule.pairs(&self.root)? {
                if !self.absolute(&source).is_file() {
                    return Err(Error::Reconciliation {
                        path: source.to_string(),
                        message: format!("source of '{key}' is not a file"),
                    });
                }
                wanted.push((source, destination));
            }
        }
        let kept: BTreeSet<&str> = wanted.iter().map(|(_, d)| d.as_str()).collect();

        let mut actions = Vec::new();
        let mut stale = BTreeSet::new();
        for (_, rule) in copy_rules(previous, &self.prefix)? {
            for (_, destination) in rule.pairs(&self.root)? {
                if !kept.contains(destination.as_str()) {
                    stale.insert(destination);
                }
            }
        }
        for destination in stale {
            let target = self.absolute(&destination);
            let removed = if self.dry_run {
                target.is_file()
            } else {
                io::remove_file_if_exists(&target).map_err(|e| failure(&destination, e))?
            };
            if removed {
                actions.push(self.record(AppliedAction {
                    action: Action::RemoveFile,
                    from: Some(destination.to_string()),
                    to: None,
                    checksum: None,
                }));
            }
        }

        for (source, destination) in wanted {
            let bytes = io::read_bytes_if_exists(&self.absolute(&source))
                .map_err(|e| failure(&source, e))?
                .unwrap_or_default();
            let existing = io::read_bytes_if_exists(&self.absolute(&destination))
                .map_err(|e| failure(&destination, e))?;
            if existing.as_deref() == Some(bytes.as_slice()) {
                continue;
            }
            if !self.dry_run {
                io::copy_file(&self.absolute(&source), &self.absolute(&destination))
                    .map_err(|e| failure(&destination, e))?;
            }
            actions.push(self.record(AppliedAction {
                action: Action::CopyFile,
                from: Some(source.to_string()),
                to: Some(destination.to_string()),
                checksum: Some(compute_content_checksum(&String::from_utf8_lossy(&bytes))),
            }));
        }
        Ok(actions)
    }

    fn absolute(&self, path: &NormalizedPath) -> NormalizedPath {
        self.root.join(path.as_str())
    }

    fn record(&self, action: AppliedAction) -> AppliedAction {
        if self.dry_run {
            tracing::info!("[dry-run] Would {action}");
        } else {
            tracing::info!("{action}");
        }
        action
    }
}

fn failure(path: &NormalizedPath, err: ctl_fs::Error) -> Error {
    Error::Reconciliation {
        path: path.to_string(),
        message: err.to_string(),
    }
}
