//! Names of the transient files and directories written next to targets.
//!
//! | Artifact | Name                                |
//! |----------|-------------------------------------|
//! | backup   | `<name>.backup-<millis>[-<n>]`       |
//! | staging  | `<name>.staging-<pid>-<millis>`      |
//! | temp     | `.<name>.tmp-<pid>-<16 hex digits>`  |
//!
//! All three live in the same directory as their target so the final
//! rename never crosses a filesystem boundary. Once a transaction has fully
//! committed or rolled back none of them is authoritative, so anything
//! [`find_orphans`] reports is safe to delete while no build is running.

use crate::error::{BuildError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const BACKUP_MARKER: &str = ".backup-";
pub const STAGING_MARKER: &str = ".staging-";
pub const TEMP_MARKER: &str = ".tmp-";

/// Kind of transient artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArtifactKind {
    Backup,
    Staging,
    Temp,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Backup => "backup",
            ArtifactKind::Staging => "staging",
            ArtifactKind::Temp => "temp",
        }
    }
}

/// An artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub is_dir: bool,
}

fn millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn file_name(target: &Path) -> Result<String> {
    target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            BuildError::InvalidPath(
                target.display().to_string(),
                "path has no file name".to_string(),
            )
        })
}

/// Returns an unused backup path next to `target`.
pub fn backup_path(target: &Path) -> Result<PathBuf> {
    let name = file_name(target)?;
    let stamp = millis();

    let first = target.with_file_name(format!("{name}{BACKUP_MARKER}{stamp}"));
    if std::fs::symlink_metadata(&first).is_err() {
        return Ok(first);
    }

    // Same target backed up twice within one millisecond
    let mut n = 1u32;
    loop {
        let candidate = target.with_file_name(format!("{name}{BACKUP_MARKER}{stamp}-{n}"));
        if std::fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Returns the staging directory path for `target`.
pub fn staging_path(target: &Path) -> Result<PathBuf> {
    let name = file_name(target)?;
    Ok(target.with_file_name(format!(
        "{name}{STAGING_MARKER}{}-{}",
        std::process::id(),
        millis()
    )))
}

/// Returns a fresh temp file path in the same directory as `target`.
pub fn temp_path(target: &Path) -> Result<PathBuf> {
    let name = file_name(target)?;
    let nonce: u64 = rand::random();
    Ok(target.with_file_name(format!(
        ".{name}{TEMP_MARKER}{}-{nonce:016x}",
        std::process::id()
    )))
}

/// Classifies file names as transaction artifacts.
pub struct ArtifactMatcher {
    backup: Regex,
    staging: Regex,
    temp: Regex,
}

impl ArtifactMatcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            backup: Regex::new(r".\.backup-\d+(?:-\d+)?$")?,
            staging: Regex::new(r".\.staging-\d+-\d+$")?,
            temp: Regex::new(r"^\..+\.tmp-\d+-[0-9a-f]{16}$")?,
        })
    }

    pub fn classify(&self, file_name: &str) -> Option<ArtifactKind> {
        if self.temp.is_match(file_name) {
            Some(ArtifactKind::Temp)
        } else if self.staging.is_match(file_name) {
            Some(ArtifactKind::Staging)
        } else if self.backup.is_match(file_name) {
            Some(ArtifactKind::Backup)
        } else {
            None
        }
    }

    /// Returns the artifact kind of the last component of `path`, if any.
    pub fn classify_path(&self, path: &Path) -> Option<ArtifactKind> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.classify(n))
    }
}

/// Finds artifacts under `root` last modified at least `min_age` ago.
///
/// Artifacts nested inside another reported artifact (e.g. files inside a
/// staging directory) are not reported separately.
pub fn find_orphans(root: &Path, min_age: Duration) -> Result<Vec<Artifact>> {
    let matcher = ArtifactMatcher::new()?;
    let now = SystemTime::now();

    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|e| e.file_name().to_str() != Some(".git"))
        .build();

    let mut found: Vec<Artifact> = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::debug!("Skipping entry due to error: {}", e);
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let Some(kind) = matcher.classify_path(path) else {
            continue;
        };

        if found.iter().any(|a| a.is_dir && path.starts_with(&a.path)) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                log::debug!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < min_age {
            log::debug!("Artifact too recent, keeping: {}", path.display());
            continue;
        }

        found.push(Artifact {
            path: path.to_path_buf(),
            kind,
            is_dir: metadata.is_dir(),
        });
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_generated_names_are_recognized() {
        let matcher = ArtifactMatcher::new().unwrap();
        let target = Path::new("/srv/site/index.html");

        let backup = backup_path(target).unwrap();
        let staging = staging_path(Path::new("/srv/site")).unwrap();
        let temp = temp_path(target).unwrap();

        assert_eq!(matcher.classify_path(&backup), Some(ArtifactKind::Backup));
        assert_eq!(matcher.classify_path(&staging), Some(ArtifactKind::Staging));
        assert_eq!(matcher.classify_path(&temp), Some(ArtifactKind::Temp));
        assert_eq!(temp.parent(), target.parent());
    }

    #[test]
    fn test_ordinary_names_are_not_artifacts() {
        let matcher = ArtifactMatcher::new().unwrap();

        for name in [
            "index.html",
            ".backup-123",
            "menu.backup-notes.md",
            ".hidden.tmp",
            "site.staging-1",
        ] {
            assert_eq!(matcher.classify(name), None, "{name}");
        }
    }

    #[test]
    fn test_backup_path_skips_taken_names() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("a.txt");

        let first = backup_path(&target).unwrap();
        fs::write(&first, "x").unwrap();
        let second = backup_path(&target).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_path_without_file_name_is_rejected() {
        assert!(matches!(
            temp_path(Path::new("/")),
            Err(BuildError::InvalidPath(..))
        ));
    }

    #[test]
    fn test_find_orphans_prunes_nested() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let staging = root.join("public.staging-42-1700000000000");
        fs::create_dir(&staging).unwrap();
        fs::write(staging.join("page.html.backup-1700000000000"), "old").unwrap();
        fs::write(root.join("menu.json.backup-1700000000000"), "old").unwrap();
        fs::write(root.join("menu.json"), "new").unwrap();

        let orphans = find_orphans(root, Duration::ZERO).unwrap();

        assert_eq!(orphans.len(), 2);
        assert!(orphans.iter().any(|a| a.kind == ArtifactKind::Staging && a.is_dir));
        assert!(orphans.iter().any(|a| a.kind == ArtifactKind::Backup));
    }

    #[test]
    fn test_find_orphans_respects_min_age() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt.backup-1"), "old").unwrap();

        let orphans = find_orphans(temp.path(), Duration::from_secs(3600)).unwrap();
        assert!(orphans.is_empty());
    }
}
