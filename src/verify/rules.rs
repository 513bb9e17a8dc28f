//! Validation rules for caller-supplied paths.
//!
//! Pure functions with no side effects beyond canonicalizing existing paths.

use crate::error::{BuildError, Result};
use crate::fs::artifacts::ArtifactMatcher;
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Validates a path meant to be joined onto a staging or root directory.
///
/// ## Rules
/// - Not empty
/// - Relative (no root, no Windows prefix)
/// - No `..` components
pub fn validate_relative_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(BuildError::InvalidPath(
            String::new(),
            "cannot be empty".to_string(),
        ));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(BuildError::InvalidPath(
                    path.display().to_string(),
                    "contains '..'".to_string(),
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BuildError::InvalidPath(
                    path.display().to_string(),
                    "must be relative".to_string(),
                ));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Validates that `path` (relative to `root`, or absolute) stays within `root`.
///
/// The longest existing prefix of the path is canonicalized and the missing
/// tail appended, so a symlinked directory pointing outside the root is
/// caught even when the final file doesn't exist yet.
pub fn validate_path_within_root(path: &Path, root: &Path) -> Result<()> {
    let full_path = root.join(path);

    if full_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(BuildError::InvalidPath(
            path.display().to_string(),
            "contains '..'".to_string(),
        ));
    }

    let canonical_root = root.canonicalize()?;
    let resolved = resolve_existing_prefix(&full_path)?;

    if !resolved.starts_with(&canonical_root) {
        return Err(BuildError::InvalidPath(
            path.display().to_string(),
            "resolves outside root".to_string(),
        ));
    }

    Ok(())
}

/// Canonicalizes the deepest ancestor of `path` that exists and re-appends
/// the components below it.
fn resolve_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut missing: Vec<&OsStr> = Vec::new();
    let mut current = path;

    loop {
        match current.canonicalize() {
            Ok(canonical) => {
                return Ok(missing
                    .iter()
                    .rev()
                    .fold(canonical, |acc, name| acc.join(name)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (current.parent(), current.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name);
                        current = parent;
                    }
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Rejects paths whose file name collides with a transaction artifact.
///
/// Such a file would be deleted by `clean` and could be mistaken for a
/// backup during recovery.
pub fn validate_not_artifact(path: &Path, matcher: &ArtifactMatcher) -> Result<()> {
    if let Some(kind) = matcher.classify_path(path) {
        return Err(BuildError::InvalidPath(
            path.display().to_string(),
            format!("file name is reserved for {} artifacts", kind.as_str()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_valid_relative_paths() {
        assert!(validate_relative_path(Path::new("index.html")).is_ok());
        assert!(validate_relative_path(Path::new("css/theme.css")).is_ok());
        assert!(validate_relative_path(Path::new("./data/menu.json")).is_ok());
    }

    #[test]
    fn test_invalid_relative_paths() {
        assert!(validate_relative_path(Path::new("")).is_err());
        assert!(validate_relative_path(Path::new("..")).is_err());
        assert!(validate_relative_path(Path::new("a/../../b")).is_err());
        assert!(validate_relative_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_within_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir(root.join("public")).unwrap();

        assert!(validate_path_within_root(Path::new("public"), root).is_ok());
        assert!(validate_path_within_root(Path::new("public/new/page.html"), root).is_ok());
        assert!(validate_path_within_root(&root.join("public"), root).is_ok());
        assert!(validate_path_within_root(Path::new("../outside"), root).is_err());
        assert!(validate_path_within_root(Path::new("/somewhere/else"), root).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_root() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = temp.path();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert!(validate_path_within_root(Path::new("link"), root).is_err());
        assert!(validate_path_within_root(Path::new("link/escaped.html"), root).is_err());
        assert!(validate_path_within_root(Path::new("link/new/deep.html"), root).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_allowed() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir(root.join("releases")).unwrap();
        std::os::unix::fs::symlink(root.join("releases"), root.join("current")).unwrap();

        assert!(validate_path_within_root(Path::new("current/index.html"), root).is_ok());
    }

    #[test]
    fn test_artifact_names_rejected() {
        let matcher = ArtifactMatcher::new().unwrap();

        assert!(validate_not_artifact(Path::new("public/index.html"), &matcher).is_ok());
        assert!(
            validate_not_artifact(Path::new("public/index.html.backup-1700000000000"), &matcher)
                .is_err()
        );
        assert!(validate_not_artifact(Path::new("site.staging-1-2"), &matcher).is_err());
    }
}
