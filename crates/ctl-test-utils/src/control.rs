//! [`ControlRepo`] builder for compile and sync scenarios.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

/// Control directory used unless a test picks another one.
pub const DEFAULT_CONTROL_DIR: &str = ".control";

/// A temporary repository root with a control directory inside it.
///
/// # Example
///
/// ```rust,no_run
/// use ctl_test_utils::ControlRepo;
///
/// let repo = ControlRepo::new();
/// repo.write_config("project.yaml", "project:\n  name: demo\n");
/// repo.assert_file_exists(".control/project.yaml");
/// ```
pub struct ControlRepo {
    temp_dir: TempDir,
    control_dir: String,
}

impl Default for ControlRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlRepo {
    /// Empty root with an empty `.control` directory.
    pub fn new() -> Self {
        Self::with_control_dir(DEFAULT_CONTROL_DIR)
    }

    pub fn with_control_dir(control_dir: &str) -> Self {
        let repo = Self {
            temp_dir: TempDir::new().unwrap(),
            control_dir: control_dir.to_string(),
        };
        fs::create_dir_all(repo.control_dir()).unwrap();
        repo
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root().join(&self.control_dir)
    }

    /// Write a configuration document below the control directory.
    pub fn write_config(&self, rel: &str, yaml: &str) {
        write(&self.control_dir().join(rel), yaml);
    }

    pub fn remove_config(&self, rel: &str) {
        fs::remove_file(self.control_dir().join(rel)).unwrap();
    }

    /// Write a file below the repository root.
    pub fn write_file(&self, rel: &str, content: &str) {
        write(&self.root().join(rel), content);
    }

    pub fn read(&self, rel: &str) -> String {
        let path = self.root().join(rel);
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("Could not read file: {}", path.display()))
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }

    /// The snapshot of the last sync, if one was written.
    pub fn snapshot(&self) -> Option<Value> {
        let path = self.control_dir().join("metadata.json");
        let text = fs::read_to_string(path).ok()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Every file below the root as `(relative path, content)`, sorted.
    ///
    /// Lock files left by atomic writes are skipped.
    pub fn files(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        collect(self.root(), self.root(), &mut out);
        out.sort();
        out
    }

    /// Every directory below the root, sorted.
    pub fn dirs(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_dirs(self.root(), self.root(), &mut out);
        out.sort();
        out
    }

    /// # Panics
    /// Panics with a descriptive message if the path does not exist.
    pub fn assert_file_exists(&self, rel: &str) {
        let full_path = self.root().join(rel);
        assert!(full_path.exists(), "Expected file to exist: {}", full_path.display());
    }

    /// # Panics
    /// Panics with a descriptive message if the path exists.
    pub fn assert_file_not_exists(&self, rel: &str) {
        let full_path = self.root().join(rel);
        assert!(!full_path.exists(), "Expected file NOT to exist: {}", full_path.display());
    }

    pub fn assert_dir_exists(&self, rel: &str) {
        let full_path = self.root().join(rel);
        assert!(full_path.is_dir(), "Expected directory: {}", full_path.display());
    }

    /// # Panics
    /// Panics if the file cannot be read or does not contain `content`.
    pub fn assert_file_contains(&self, rel: &str, content: &str) {
        let file_content = self.read(rel);
        assert!(
            file_content.contains(content),
            "File {rel} does not contain expected content.\nExpected: {content}\nActual: {file_content}"
        );
    }
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap()
        .to_string_lossy()
        .replace('\\', "/")
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, out);
        } else if path.extension().is_none_or(|ext| ext != "lock") {
            let content = fs::read_to_string(&path).unwrap_or_default();
            out.push((relative(root, &path), content));
        }
    }
}

fn collect_dirs(root: &Path, dir: &Path, out: &mut Vec<String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.push(relative(root, &path));
            collect_dirs(root, &path, out);
        }
    }
}
