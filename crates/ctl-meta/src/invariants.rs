//! Cross-field invariants
//!
//! Checks that relate several places of a compiled tree to each other and so
//! cannot be written as a schema. Each check is data: a kind, the wildcard
//! paths it reads and a severity. A fatal violation aborts the compile; a
//! log-only one is reported through `tracing` and returned to the caller.

use crate::{Error, Result};
use ctl_content::select;
use ctl_fs::NormalizedPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a violation is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Fatal,
    LogOnly,
}

/// What an invariant checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InvariantKind {
    /// No declared root directory lies strictly inside another one.
    NestedRoots { patterns: Vec<String> },
    /// Each matched mapping holds `root`, `source`, `source_rel` and
    /// (optionally) `import` paths that must nest in that order.
    UnitPaths {
        pattern: String,
        #[serde(default = "default_true")]
        has_import: bool,
    },
    /// No two matched strings are prefixes of one another.
    MutualPrefixes { pattern: String },
    /// Every matched identifier (or list of identifiers) names an entry of
    /// the mapping at `target`.
    CrossReference { pattern: String, target: String },
    /// Every matched string belongs to a closed vocabulary.
    ClosedVocabulary { pattern: String, allowed: Vec<String> },
    /// Matched values are pairwise distinct.
    Unique { pattern: String },
}

fn default_true() -> bool {
    true
}

/// A named, configured check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invariant {
    pub name: String,
    #[serde(flatten)]
    pub kind: InvariantKind,
    pub severity: Severity,
}

impl Invariant {
    pub fn new(name: impl Into<String>, kind: InvariantKind, severity: Severity) -> Self {
        Self {
            name: name.into(),
            kind,
            severity,
        }
    }
}

/// One detected violation, naming both offending locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub first: String,
    pub second: String,
    pub message: String,
}

/// An ordered collection of invariants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvariantSet {
    invariants: Vec<Invariant>,
}

impl InvariantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The checks applied to a control center tree.
    ///
    /// `classifiers` is the externally supplied vocabulary for package
    /// classifiers; without it that check is skipped.
    pub fn standard(classifiers: Option<Vec<String>>) -> Self {
        let mut set = Self::new()
            .with(Invariant::new(
                "nested-roots",
                InvariantKind::NestedRoots {
                    patterns: vec![
                        "control.path".into(),
                        "local.cache.path".into(),
                        "local.report.path".into(),
                        "pypkg_*.path.root".into(),
                        "web.path.root".into(),
                    ],
                },
                Severity::Fatal,
            ))
            .with(Invariant::new(
                "unit-paths",
                InvariantKind::UnitPaths {
                    pattern: "pypkg_*.path".into(),
                    has_import: true,
                },
                Severity::Fatal,
            ))
            .with(Invariant::new(
                "web-paths",
                InvariantKind::UnitPaths {
                    pattern: "web.path".into(),
                    has_import: false,
                },
                Severity::Fatal,
            ))
            .with(Invariant::new(
                "branch-prefixes",
                InvariantKind::MutualPrefixes {
                    pattern: "branch.*.name".into(),
                },
                Severity::Fatal,
            ))
            .with(Invariant::new(
                "label-prefixes",
                InvariantKind::MutualPrefixes {
                    pattern: "label.group.*.prefix".into(),
                },
                Severity::LogOnly,
            ))
            .with(Invariant::new(
                "citation-authors",
                InvariantKind::CrossReference {
                    pattern: "citation.authors".into(),
                    target: "team".into(),
                },
                Severity::Fatal,
            ))
            .with(Invariant::new(
                "citation-contacts",
                InvariantKind::CrossReference {
                    pattern: "citation.contacts".into(),
                    target: "team".into(),
                },
                Severity::Fatal,
            ))
            .with(Invariant::new(
                "changelog-paths",
                InvariantKind::Unique {
                    pattern: "changelog.*.path".into(),
                },
                Severity::Fatal,
            ));
        if let Some(allowed) = classifiers {
            set.push(Invariant::new(
                "classifiers",
                InvariantKind::ClosedVocabulary {
                    pattern: "pypkg_*.classifiers".into(),
                    allowed,
                },
                Severity::Fatal,
            ));
        }
        set
    }

    pub fn with(mut self, invariant: Invariant) -> Self {
        self.push(invariant);
        self
    }

    pub fn push(&mut self, invariant: Invariant) {
        self.invariants.push(invariant);
    }

    /// Change the severity of a named invariant. Returns `false` if unknown.
    pub fn set_severity(&mut self, name: &str, severity: Severity) -> bool {
        match self.invariants.iter_mut().find(|i| i.name == name) {
            Some(invariant) => {
                invariant.severity = severity;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Invariant> {
        self.invariants.iter()
    }

    /// Run every invariant against `tree`.
    ///
    /// Stops at the first fatal violation. Log-only violations are logged
    /// and returned.
    pub fn check(&self, tree: &Value) -> Result<Vec<InvariantViolation>> {
        let mut reported = Vec::new();
        for invariant in &self.invariants {
            for violation in find_violations(invariant, tree) {
                match invariant.severity {
                    Severity::Fatal => {
                        return Err(Error::CrossFieldInvariant {
                            invariant: violation.invariant,
                            first: violation.first,
                            second: violation.second,
                            message: violation.message,
                        });
                    }
                    Severity::LogOnly => {
                        tracing::warn!(
                            invariant = %violation.invariant,
                            first = %violation.first,
                            second = %violation.second,
                            "{}",
                            violation.message
                        );
                        reported.push(violation);
                    }
                }
            }
        }
        Ok(reported)
    }
}

fn find_violations(invariant: &Invariant, tree: &Value) -> Vec<InvariantViolation> {
    let violation = |first: &str, second: &str, message: String| InvariantViolation {
        invariant: invariant.name.clone(),
        first: first.to_string(),
        second: second.to_string(),
        message,
    };
    let mut out = Vec::new();

    match &invariant.kind {
        InvariantKind::NestedRoots { patterns } => {
            let roots: Vec<(String, NormalizedPath)> = patterns
                .iter()
                .flat_map(|p| select(tree, p))
                .filter_map(|(path, v)| v.as_str().map(|s| (path, NormalizedPath::new(s))))
                .collect();
            for (i, (path_a, a)) in roots.iter().enumerate() {
                for (path_b, b) in &roots[i + 1..] {
                    let (inner, inner_path, outer, outer_path) = if a.is_strict_descendant_of(b) {
                        (a, path_a, b, path_b)
                    } else if b.is_strict_descendant_of(a) {
                        (b, path_b, a, path_a)
                    } else {
                        continue;
                    };
                    out.push(violation(
                        inner_path,
                        outer_path,
                        format!("directory '{inner}' lies inside directory '{outer}'"),
                    ));
                }
            }
        }
        InvariantKind::UnitPaths { pattern, has_import } => {
            for (unit_path, unit) in select(tree, pattern) {
                let field = |key: &str| unit.get(key).and_then(Value::as_str).map(NormalizedPath::new);
                let at = |key: &str| format!("{unit_path}.{key}");
                let (Some(root), Some(source)) = (field("root"), field("source")) else {
                    continue;
                };
                let Some(computed) = source.relative_to(&root) else {
                    out.push(violation(
                        &at("source"),
                        &at("root"),
                        format!("source '{source}' is not inside root '{root}'"),
                    ));
                    continue;
                };
                if let Some(declared) = field("source_rel") {
                    if declared.as_str() != computed {
                        out.push(violation(
                            &at("source_rel"),
                            &at("source"),
                            format!("declared relative path '{declared}' differs from computed '{computed}'"),
                        ));
                    }
                }
                if !*has_import {
                    continue;
                }
                let Some(import) = field("import") else { continue };
                let Some(computed) = import.relative_to(&source) else {
                    out.push(violation(
                        &at("import"),
                        &at("source"),
                        format!("import path '{import}' is not inside source '{source}'"),
                    ));
                    continue;
                };
                if let Some(declared) = field("import_rel") {
                    if declared.as_str() != computed {
                        out.push(violation(
                            &at("import_rel"),
                            &at("import"),
                            format!("declared relative path '{declared}' differs from computed '{computed}'"),
                        ));
                    }
                }
            }
        }
        InvariantKind::MutualPrefixes { pattern } => {
            let names: Vec<(String, &str)> = select(tree, pattern)
                .into_iter()
                .filter_map(|(path, v)| v.as_str().map(|s| (path, s)))
                .collect();
            for (i, (path_a, a)) in names.iter().enumerate() {
                for (path_b, b) in &names[i + 1..] {
                    if a.starts_with(b) || b.starts_with(a) {
                        out.push(violation(
                            path_a,
                            path_b,
                            format!("'{a}' and '{b}' overlap as prefixes"),
                        ));
                    }
                }
            }
        }
        InvariantKind::CrossReference { pattern, target } => {
            let targets = select(tree, target);
            let known = |id: &str| {
                targets.iter().any(|(_, t)| match t {
                    Value::Object(map) => map.contains_key(id),
                    Value::Array(items) => items.iter().any(|item| item.as_str() == Some(id)),
                    _ => false,
                })
            };
            for (ref_path, value) in select(tree, pattern) {
                let ids: Vec<(String, &str)> = match value {
                    Value::String(id) => vec![(ref_path.clone(), id.as_str())],
                    Value::Array(items) => items
                        .iter()
                        .enumerate()
                        .filter_map(|(idx, item)| item.as_str().map(|id| (format!("{ref_path}[{idx}]"), id)))
                        .collect(),
                    _ => Vec::new(),
                };
                for (path, id) in ids {
                    if !known(id) {
                        out.push(violation(
                            &path,
                            target,
                            format!("'{id}' does not name an entry of '{target}'"),
                        ));
                    }
                }
            }
        }
        InvariantKind::ClosedVocabulary { pattern, allowed } => {
            for (path, value) in select(tree, pattern) {
                let items: Vec<(String, &Value)> = match value {
                    Value::Array(items) => items
                        .iter()
                        .enumerate()
                        .map(|(idx, item)| (format!("{path}[{idx}]"), item))
                        .collect(),
                    other => vec![(path.clone(), other)],
                };
                for (item_path, item) in items {
                    let Some(term) = item.as_str() else { continue };
                    if !allowed.iter().any(|a| a == term) {
                        out.push(violation(
                            &item_path,
                            pattern,
                            format!("'{term}' is not in the allowed vocabulary"),
                        ));
                    }
                }
            }
        }
        InvariantKind::Unique { pattern } => {
            let values = select(tree, pattern);
            for (i, (path_a, a)) in values.iter().enumerate() {
                if let Some((path_b, _)) = values[..i].iter().find(|(_, b)| b == a) {
                    out.push(violation(path_a, path_b, format!("{a} is already used")));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fatal(kind: InvariantKind) -> InvariantSet {
        InvariantSet::new().with(Invariant::new("check", kind, Severity::Fatal))
    }

    fn fatal_paths(set: &InvariantSet, tree: &Value) -> (String, String) {
        match set.check(tree) {
            Err(Error::CrossFieldInvariant { first, second, .. }) => (first, second),
            other => panic!("expected an invariant violation, got {other:?}"),
        }
    }

    #[test]
    fn nested_roots_reports_inner_then_outer() {
        let set = fatal(InvariantKind::NestedRoots {
            patterns: vec!["control.path".into(), "pypkg_*.path.root".into()],
        });
        let tree = json!({"control": {"path": ".control"}, "pypkg_main": {"path": {"root": ".control/pkg"}}});
        assert_eq!(
            fatal_paths(&set, &tree),
            ("pypkg_main.path.root".to_string(), "control.path".to_string())
        );
        let ok = json!({"control": {"path": ".control"}, "pypkg_main": {"path": {"root": "pkg"}}});
        assert!(set.check(&ok).unwrap().is_empty());
    }

    #[test]
    fn unit_paths_checks_relative_source() {
        let set = fatal(InvariantKind::UnitPaths {
            pattern: "pypkg_*.path".into(),
            has_import: true,
        });
        let good = json!({"pypkg_main": {"path": {
            "root": "pkg", "source": "pkg/src", "source_rel": "src", "import": "pkg/src/demo"
        }}});
        assert!(set.check(&good).unwrap().is_empty());

        let stale = json!({"pypkg_main": {"path": {
            "root": "pkg", "source": "pkg/lib", "source_rel": "src", "import": "pkg/lib/demo"
        }}});
        assert_eq!(
            fatal_paths(&set, &stale),
            ("pypkg_main.path.source_rel".to_string(), "pypkg_main.path.source".to_string())
        );

        let outside = json!({"pypkg_main": {"path": {"root": "pkg", "source": "src"}}});
        assert_eq!(fatal_paths(&set, &outside).0, "pypkg_main.path.source");
    }

    #[test]
    fn unit_paths_checks_relative_import() {
        let set = fatal(InvariantKind::UnitPaths {
            pattern: "pypkg_*.path".into(),
            has_import: true,
        });
        let good = json!({"pypkg_main": {"path": {
            "root": "pkg", "source": "pkg/src", "source_rel": "src",
            "import": "pkg/src/demo", "import_rel": "demo"
        }}});
        assert!(set.check(&good).unwrap().is_empty());

        let stale = json!({"pypkg_main": {"path": {
            "root": "pkg", "source": "pkg/src", "source_rel": "src",
            "import": "pkg/src/demo", "import_rel": "other"
        }}});
        assert_eq!(
            fatal_paths(&set, &stale),
            ("pypkg_main.path.import_rel".to_string(), "pypkg_main.path.import".to_string())
        );

        let outside = json!({"pypkg_main": {"path": {
            "root": "pkg", "source": "pkg/src", "import": "pkg/demo"
        }}});
        assert_eq!(fatal_paths(&set, &outside).0, "pypkg_main.path.import");
    }

    #[test]
    fn mutual_prefixes_detected() {
        let set = fatal(InvariantKind::MutualPrefixes {
            pattern: "branch.*.name".into(),
        });
        let tree = json!({"branch": {"dev": {"name": "dev"}, "devel": {"name": "dev/"}}});
        assert_eq!(
            fatal_paths(&set, &tree),
            ("branch.dev.name".to_string(), "branch.devel.name".to_string())
        );
    }

    #[test]
    fn dangling_reference_names_both_paths() {
        let set = fatal(InvariantKind::CrossReference {
            pattern: "citation.authors".into(),
            target: "team".into(),
        });
        let tree = json!({"team": {"alice": {}}, "citation": {"authors": ["alice", "bob"]}});
        assert_eq!(
            fatal_paths(&set, &tree),
            ("citation.authors[1]".to_string(), "team".to_string())
        );
    }

    #[test]
    fn log_only_violations_are_returned() {
        let set = InvariantSet::new().with(Invariant::new(
            "vocab",
            InvariantKind::ClosedVocabulary {
                pattern: "pkg.classifiers".into(),
                allowed: vec!["Typing :: Typed".into()],
            },
            Severity::LogOnly,
        ));
        let tree = json!({"pkg": {"classifiers": ["Typing :: Typed", "Made :: Up"]}});
        let reported = set.check(&tree).unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].first, "pkg.classifiers[1]");
    }

    #[test]
    fn severity_can_be_downgraded() {
        let mut set = fatal(InvariantKind::Unique {
            pattern: "changelog.*.path".into(),
        });
        let tree = json!({"changelog": {"a": {"path": "CHANGES.md"}, "b": {"path": "CHANGES.md"}}});
        assert!(set.check(&tree).is_err());
        assert!(set.set_severity("check", Severity::LogOnly));
        assert_eq!(set.check(&tree).unwrap().len(), 1);
    }
}
