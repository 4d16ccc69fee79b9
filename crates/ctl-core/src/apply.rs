//! Applies a change plan to the filesystem
//!
//! Directories are handled first, in plan order, so that a moved parent takes
//! its children along before any file lands. File removals run before file
//! writes. Paths that are already gone are tolerated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diff::ChangePlan;
use crate::entity::{ChangeKind, GeneratedEntity};
use crate::error::{Error, Result};
use ctl_fs::checksum::compute_content_checksum;
use ctl_fs::io::{self, RobustnessConfig};
use ctl_fs::NormalizedPath;

/// What was done to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateDir,
    MoveDir,
    RemoveDir,
    WriteFile,
    RemoveFile,
    CopyFile,
}

impl Action {
    fn verb(&self) -> &'static str {
        match self {
            Self::CreateDir => "create directory",
            Self::MoveDir => "move directory",
            Self::RemoveDir => "remove directory",
            Self::WriteFile => "write",
            Self::RemoveFile => "remove",
            Self::CopyFile => "copy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedAction {
    pub action: Action,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Checksum of written content
    pub checksum: Option<String>,
}

impl fmt::Display for AppliedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) => write!(f, "{} {from} -> {to}", self.action.verb()),
            (Some(path), None) | (None, Some(path)) => write!(f, "{} {path}", self.action.verb()),
            (None, None) => f.write_str(self.action.verb()),
        }
    }
}

/// Actions performed, or that would be performed in a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub actions: Vec<AppliedAction>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// One line per action, prefixed with `[dry-run] Would` when nothing ran.
    pub fn lines(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|action| {
                if self.dry_run {
                    format!("[dry-run] Would {action}")
                } else {
                    action.to_string()
                }
            })
            .collect()
    }
}

/// Performs the filesystem side of a [`ChangePlan`]
#[derive(Debug, Clone)]
pub struct ApplyEngine {
    root: NormalizedPath,
    dry_run: bool,
    robustness: RobustnessConfig,
}

impl ApplyEngine {
    pub fn new(root: impl Into<NormalizedPath>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
            robustness: RobustnessConfig::default(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_robustness(mut self, robustness: RobustnessConfig) -> Self {
        self.robustness = robustness;
        self
    }

    pub fn apply(&self, plan: &ChangePlan) -> Result<ApplyReport> {
        let mut report = ApplyReport {
            dry_run: self.dry_run,
            actions: Vec::new(),
        };

        for dir in plan.directories() {
            self.apply_dir(dir, &mut report)?;
        }
        for file in plan.files() {
            if file.change_kind().needs_previous_path() {
                self.remove_file(file, &mut report)?;
            }
        }
        for file in plan.files() {
            if file.change_kind().needs_new_path() {
                self.write_file(file, &mut report)?;
            }
        }

        tracing::info!(
            actions = report.actions.len(),
            dry_run = self.dry_run,
            "Change plan applied"
        );
        Ok(report)
    }

    fn absolute(&self, path: &NormalizedPath) -> NormalizedPath {
        self.root.join(path.as_str())
    }

    fn record(&self, report: &mut ApplyReport, action: AppliedAction) {
        if self.dry_run {
            tracing::info!("[dry-run] Would {action}");
        } else {
            tracing::info!("{action}");
        }
        report.actions.push(action);
    }

    fn apply_dir(&self, dir: &GeneratedEntity, report: &mut ApplyReport) -> Result<()> {
        let change = dir.change_kind();
        let (from, to) = (dir.path_before.as_ref(), dir.path.as_ref());
        let action = match (change, from, to) {
            (ChangeKind::Added, _, Some(to)) => {
                if !self.dry_run {
                    io::create_dir_all(&self.absolute(to)).map_err(|e| failure(to, e))?;
                }
                Action::CreateDir
            }
            (ChangeKind::Removed, Some(from), _) => {
                if !self.dry_run {
                    io::remove_dir_all_if_exists(&self.absolute(from)).map_err(|e| failure(from, e))?;
                }
                Action::RemoveDir
            }
            (ChangeKind::Moved, Some(from), Some(to)) => {
                let (source, target) = (self.absolute(from), self.absolute(to));
                if !source.is_dir() && target.is_dir() {
                    tracing::debug!(from = %from, to = %to, "Directory already moved");
                    return Ok(());
                }
                if !self.dry_run {
                    io::rename(&source, &target).map_err(|e| failure(to, e))?;
                }
                Action::MoveDir
            }
            _ => return Ok(()),
        };
        self.record(
            report,
            AppliedAction {
                action,
                from: (action != Action::CreateDir).then(|| from.map(ToString::to_string)).flatten(),
                to: (action != Action::RemoveDir).then(|| to.map(ToString::to_string)).flatten(),
                checksum: None,
            },
        );
        Ok(())
    }

    fn remove_file(&self, file: &GeneratedEntity, report: &mut ApplyReport) -> Result<()> {
        let Some(before) = &file.path_before else {
            return Err(Error::Reconciliation {
                path: file.display_path(),
                message: format!("{} without a previous path", file.change_kind()),
            });
        };
        // Files inside a removed or moved directory may already be gone
        if !self.dry_run {
            let removed = io::remove_file_if_exists(&self.absolute(before)).map_err(|e| failure(before, e))?;
            if !removed {
                return Ok(());
            }
        } else if !self.absolute(before).is_file() {
            return Ok(());
        }
        self.record(
            report,
            AppliedAction {
                action: Action::RemoveFile,
                from: Some(before.to_string()),
                to: None,
                checksum: None,
            },
        );
        Ok(())
    }

    fn write_file(&self, file: &GeneratedEntity, report: &mut ApplyReport) -> Result<()> {
        let Some(path) = &file.path else {
            return Err(Error::Reconciliation {
                path: file.display_path(),
                message: format!("{} without a path", file.change_kind()),
            });
        };
        let mut content = file.content.as_deref().unwrap_or_default().trim().to_string();
        content.push('\n');

        if !self.dry_run {
            let target = self.absolute(path);
            io::write_atomic(&target, content.as_bytes(), self.robustness).map_err(|e| failure(path, e))?;
            if file.executable {
                io::set_executable(&target).map_err(|e| failure(path, e))?;
            }
        }
        self.record(
            report,
            AppliedAction {
                action: Action::WriteFile,
                from: file
                    .path_before
                    .as_ref()
                    .filter(|before| *before != path)
                    .map(ToString::to_string),
                to: Some(path.to_string()),
                checksum: Some(compute_content_checksum(&content)),
            },
        );
        Ok(())
    }
}

fn failure(path: &NormalizedPath, err: ctl_fs::Error) -> Error {
    Error::Reconciliation {
        path: path.to_string(),
        message: err.to_string(),
    }
}
