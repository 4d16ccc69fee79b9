//! Normalized path handling for cross-platform compatibility

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// A path normalized to use forward slashes internally.
///
/// Backslashes become forward slashes, repeated separators collapse, `.`
/// components and trailing separators are dropped. Conversion to the
/// platform-native form only happens at I/O boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath {
    inner: String,
}

impl NormalizedPath {
    /// Create a new NormalizedPath from any path-like input.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy().replace('\\', "/");
        Self { inner: clean(&raw) }
    }

    /// Get the internal normalized string representation.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Convert to a platform-native PathBuf for I/O operations.
    pub fn to_native(&self) -> PathBuf {
        PathBuf::from(&self.inner)
    }

    /// Join this path with a (possibly multi-component) relative segment.
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.replace('\\', "/");
        if self.inner.is_empty() {
            return Self::new(segment);
        }
        Self {
            inner: clean(&format!("{}/{}", self.inner, segment)),
        }
    }

    /// Get the parent directory.
    pub fn parent(&self) -> Option<Self> {
        match self.inner.rfind('/') {
            Some(0) if self.inner.len() > 1 => Some(Self {
                inner: "/".to_string(),
            }),
            Some(idx) if idx > 0 => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            _ => None,
        }
    }

    /// Get the file name component.
    pub fn file_name(&self) -> Option<&str> {
        self.inner.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Get the extension if present.
    pub fn extension(&self) -> Option<&str> {
        self.file_name().and_then(|name| {
            let idx = name.rfind('.')?;
            if idx == 0 { None } else { Some(&name[idx + 1..]) }
        })
    }

    /// Whether `self` equals `base` or lies underneath it, compared by component.
    pub fn starts_with(&self, base: &NormalizedPath) -> bool {
        self.relative_to(base).is_some()
    }

    /// Whether `self` lies strictly underneath `base`.
    pub fn is_strict_descendant_of(&self, base: &NormalizedPath) -> bool {
        matches!(self.relative_to(base), Some(rel) if !rel.is_empty())
    }

    /// Path of `self` relative to `base`, or `None` if `self` is not under `base`.
    ///
    /// Returns an empty string when both paths are equal.
    pub fn relative_to(&self, base: &NormalizedPath) -> Option<String> {
        if base.inner.is_empty() {
            return Some(self.inner.clone());
        }
        if self.inner == base.inner {
            return Some(String::new());
        }
        let prefix = if base.inner.ends_with('/') {
            base.inner.clone()
        } else {
            format!("{}/", base.inner)
        };
        self.inner.strip_prefix(&prefix).map(str::to_string)
    }

    /// Check if this path exists on the filesystem.
    pub fn exists(&self) -> bool {
        self.to_native().exists()
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.to_native().is_dir()
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.to_native().is_file()
    }
}

fn clean(raw: &str) -> String {
    let absolute = raw.starts_with('/');
    let network = raw.starts_with("//") && !raw.starts_with("///");
    let parts: Vec<&str> = raw
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    let body = parts.join("/");
    if network {
        format!("//{body}")
    } else if absolute {
        format!("/{body}")
    } else {
        body
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.inner)
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<&str> for NormalizedPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NormalizedPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<PathBuf> for NormalizedPath {
    fn from(p: PathBuf) -> Self {
        Self::new(p)
    }
}

impl From<&Path> for NormalizedPath {
    fn from(p: &Path) -> Self {
        Self::new(p)
    }
}

impl Serialize for NormalizedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.inner)
    }
}

impl<'de> Deserialize<'de> for NormalizedPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a\\b\\c", "a/b/c")]
    #[case("a//b/./c/", "a/b/c")]
    #[case("/abs//x", "/abs/x")]
    #[case("//server/share", "//server/share")]
    #[case("./rel", "rel")]
    fn normalizes_separators(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(NormalizedPath::new(input).as_str(), expected);
    }

    #[test]
    fn relative_to_requires_component_boundary() {
        let root = NormalizedPath::new("repo/pkg");
        assert_eq!(
            NormalizedPath::new("repo/pkg/src").relative_to(&root),
            Some("src".to_string())
        );
        assert_eq!(NormalizedPath::new("repo/pkgs").relative_to(&root), None);
        assert_eq!(NormalizedPath::new("repo/pkg").relative_to(&root), Some(String::new()));
    }

    #[test]
    fn strict_descendant_excludes_self() {
        let root = NormalizedPath::new("a/b");
        assert!(NormalizedPath::new("a/b/c").is_strict_descendant_of(&root));
        assert!(!root.is_strict_descendant_of(&root));
        assert!(root.starts_with(&root));
    }

    #[test]
    fn parent_and_file_name() {
        let path = NormalizedPath::new("x/y/z.toml");
        assert_eq!(path.parent(), Some(NormalizedPath::new("x/y")));
        assert_eq!(path.file_name(), Some("z.toml"));
        assert_eq!(path.extension(), Some("toml"));
        assert_eq!(NormalizedPath::new("/top").parent(), Some(NormalizedPath::new("/")));
        assert_eq!(NormalizedPath::new("single").parent(), None);
    }

    #[test]
    fn join_on_empty_base() {
        assert_eq!(NormalizedPath::new("").join("a/b").as_str(), "a/b");
    }
}
