//! Resource Identity
//!
//! Cache keys are normalized absolute paths: relative inputs are anchored
//! at the process working directory, then `.`/`..` components and duplicate
//! separators are collapsed lexically. Reserved names (default resources,
//! shader prefixes) bypass normalization.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Normalized identity of a cached resource. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    /// Identity for a reserved name (default resources, shader prefixes).
    /// No path normalization is applied.
    pub fn from_name(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// Normalized identity for a filesystem path.
    pub fn from_path(path: &Path) -> Self {
        Self(Arc::from(normalize(path).to_string_lossy().as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lexically canonical absolute form of `path`. Purely textual: symlinks
/// are not resolved and the file does not have to exist.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root.
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(Path::new("assets/./meshes/../meshes//cube.obj"));
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_collapses_dot_components() {
        let a = ResourceId::from_path(Path::new("/data/./assets/../assets/mesh.obj"));
        let b = ResourceId::from_path(Path::new("/data/assets/mesh.obj"));
        assert_eq!(a, b);
    }

    #[test]
    fn relative_paths_become_absolute() {
        let id = ResourceId::from_path(Path::new("mesh.obj"));
        assert!(Path::new(id.as_str()).is_absolute());
    }

    #[test]
    fn reserved_names_are_verbatim() {
        let id = ResourceId::from_name("default_cube");
        assert_eq!(id.as_str(), "default_cube");
    }
}
