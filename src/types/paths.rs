//! Path newtypes used as document identities.
//!
//! Documents inside the project root are identified by root-relative paths;
//! files outside the root keep their absolute identity and can only
//! contribute external symbols.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Lexically normalize a path: drop `.` components and resolve `..`
/// against preceding components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// A normalized absolute filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbsolutePath(PathBuf);

impl AbsolutePath {
    /// Create from a path that is already absolute. Returns `None` otherwise.
    pub fn new(path: &Path) -> Option<Self> {
        if path.is_absolute() {
            Some(Self(normalize(path)))
        } else {
            None
        }
    }

    /// Interpret `path` relative to `base` when it is not absolute.
    pub fn resolve(base: &AbsolutePath, path: &Path) -> Self {
        if path.is_absolute() {
            Self(normalize(path))
        } else {
            Self(normalize(&base.0.join(path)))
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn join(&self, tail: &Path) -> AbsolutePath {
        Self(normalize(&self.0.join(tail)))
    }

    /// Directory containing this path, if any.
    pub fn parent(&self) -> Option<AbsolutePath> {
        self.0.parent().map(|p| Self(p.to_path_buf()))
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// The project root directory. Paths under it get root-relative identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPath(AbsolutePath);

impl RootPath {
    pub fn new(dir: AbsolutePath) -> Self {
        Self(dir)
    }

    pub fn as_absolute(&self) -> &AbsolutePath {
        &self.0
    }

    /// Rewrite `path` relative to this root. `None` for paths outside it.
    pub fn relativize(&self, path: &AbsolutePath) -> Option<RootRelativePath> {
        let rel = path.as_path().strip_prefix(self.0.as_path()).ok()?;
        RootRelativePath::new(rel.to_string_lossy().into_owned())
    }

    /// Inverse of [`RootPath::relativize`].
    pub fn make_absolute(&self, rel: &RootRelativePath) -> AbsolutePath {
        self.0.join(Path::new(rel.as_str()))
    }
}

/// A non-empty path relative to the project root, using `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootRelativePath(String);

impl RootRelativePath {
    /// Returns `None` for empty input.
    pub fn new(value: String) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        // Document identities are OS-independent.
        if value.contains('\\') {
            return Some(Self(value.replace('\\', "/")));
        }
        Some(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootRelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity for a file within one translation unit.
///
/// Two parser-internal file ids that resolve to the same real file map to
/// the same `StableFileId`; the identity also crosses TU boundaries, unlike
/// the parser-internal ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StableFileId {
    /// File under the project root, identified by its root-relative path.
    InProject(RootRelativePath),
    /// File outside the project root; only external symbols may refer to it.
    External(AbsolutePath),
}

impl StableFileId {
    /// Resolve an absolute path against the project root.
    pub fn from_absolute(root: &RootPath, path: &AbsolutePath) -> Self {
        match root.relativize(path) {
            Some(rel) => Self::InProject(rel),
            None => Self::External(path.clone()),
        }
    }

    pub fn is_in_project(&self) -> bool {
        matches!(self, Self::InProject(_))
    }

    /// Identity string used for documents and synthetic file symbols.
    pub fn display_path(&self) -> String {
        match self {
            Self::InProject(rel) => rel.as_str().to_string(),
            Self::External(abs) => abs.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drops_dot_components() {
        assert_eq!(
            normalize(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize(Path::new("/a/b/")), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_absolute_path_rejects_relative() {
        assert!(AbsolutePath::new(Path::new("relative/path.h")).is_none());
        assert!(AbsolutePath::new(Path::new("/abs/path.h")).is_some());
    }

    #[test]
    fn test_resolve_against_base() {
        let base = AbsolutePath::new(Path::new("/proj/build")).unwrap();
        let resolved = AbsolutePath::resolve(&base, Path::new("../src/main.cpp"));
        assert_eq!(resolved.as_path(), Path::new("/proj/src/main.cpp"));
    }

    #[test]
    fn test_relativize_inside_and_outside_root() {
        let root = RootPath::new(AbsolutePath::new(Path::new("/proj")).unwrap());
        let inside = AbsolutePath::new(Path::new("/proj/src/a.cpp")).unwrap();
        let outside = AbsolutePath::new(Path::new("/usr/include/stdio.h")).unwrap();

        assert_eq!(
            root.relativize(&inside).unwrap().as_str(),
            "src/a.cpp"
        );
        assert!(root.relativize(&outside).is_none());
    }

    #[test]
    fn test_root_relative_path_non_empty() {
        assert!(RootRelativePath::new(String::new()).is_none());
        assert_eq!(
            RootRelativePath::new("src\\a.cpp".to_string()).unwrap().as_str(),
            "src/a.cpp"
        );
    }

    #[test]
    fn test_stable_file_id_partitions_by_root() {
        let root = RootPath::new(AbsolutePath::new(Path::new("/proj")).unwrap());
        let inside = AbsolutePath::new(Path::new("/proj/include/h.h")).unwrap();
        let outside = AbsolutePath::new(Path::new("/opt/sdk/h.h")).unwrap();

        let in_id = StableFileId::from_absolute(&root, &inside);
        let out_id = StableFileId::from_absolute(&root, &outside);

        assert!(in_id.is_in_project());
        assert!(!out_id.is_in_project());
        assert_eq!(in_id.display_path(), "include/h.h");
        assert_eq!(out_id.display_path(), "/opt/sdk/h.h");
    }
}
