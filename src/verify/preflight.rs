//! Pre-flight checks performed before applying a build plan.
//!
//! These checks catch mistakes that would otherwise surface halfway
//! through a transaction and force a rollback. Unlike `rules`, these
//! functions inspect the file system.

use crate::error::{BuildError, Result};
use crate::fs::artifacts::ArtifactMatcher;
use crate::plan::{BuildPlan, PlanOp};
use crate::verify::rules::{validate_not_artifact, validate_path_within_root};
use std::path::{Path, PathBuf};

/// Validates a plan against the current state of its root.
///
/// ## Checks
/// - Root is an existing directory
/// - Every written path stays inside the root and is not an artifact name
/// - Write/copy targets have a parent that exists or is created earlier
/// - Copy sources are files, publish sources are directories
/// - Publish targets don't repeat or nest
pub fn preflight_checks(plan: &BuildPlan) -> Result<()> {
    if !plan.root.is_dir() {
        return Err(BuildError::InvalidPlan(format!(
            "root is not a directory: {}",
            plan.root.display()
        )));
    }

    let matcher = ArtifactMatcher::new()?;
    let mut created_dirs: Vec<PathBuf> = Vec::new();
    let mut publish_targets: Vec<PathBuf> = Vec::new();

    for (idx, op) in plan.ops.iter().enumerate() {
        let written = op.written_path();
        validate_path_within_root(written, &plan.root)?;
        validate_not_artifact(written, &matcher)?;

        match op {
            PlanOp::Write { path, .. } => {
                check_parent(plan, idx, path, &created_dirs)?;
            }
            PlanOp::Copy { from, to } => {
                if !plan.resolve(from).is_file() {
                    return Err(BuildError::InvalidPlan(format!(
                        "op #{}: copy source is not a file: {}",
                        idx + 1,
                        from.display()
                    )));
                }
                check_parent(plan, idx, to, &created_dirs)?;
            }
            PlanOp::Mkdir { path } => created_dirs.push(plan.resolve(path)),
            PlanOp::Remove { path } => {
                if plan.resolve(path).is_dir() {
                    return Err(BuildError::InvalidPlan(format!(
                        "op #{}: cannot remove a directory: {}",
                        idx + 1,
                        path.display()
                    )));
                }
            }
            PlanOp::Publish { source, target } => {
                if !plan.resolve(source).is_dir() {
                    return Err(BuildError::InvalidPlan(format!(
                        "op #{}: publish source is not a directory: {}",
                        idx + 1,
                        source.display()
                    )));
                }

                let target = plan.resolve(target);
                if let Some(other) = publish_targets
                    .iter()
                    .find(|t| t.starts_with(&target) || target.starts_with(t))
                {
                    return Err(BuildError::InvalidPlan(format!(
                        "op #{}: publish target {} overlaps {}",
                        idx + 1,
                        target.display(),
                        other.display()
                    )));
                }
                publish_targets.push(target);
            }
        }
    }

    log::debug!("Preflight passed for {} operations", plan.ops.len());
    Ok(())
}

fn check_parent(plan: &BuildPlan, idx: usize, path: &Path, created: &[PathBuf]) -> Result<()> {
    let full = plan.resolve(path);
    let Some(parent) = full.parent() else {
        return Ok(());
    };

    if parent.is_dir() || created.iter().any(|dir| dir.starts_with(parent)) {
        return Ok(());
    }

    Err(BuildError::InvalidPlan(format!(
        "op #{}: parent directory does not exist: {} (add a mkdir step)",
        idx + 1,
        parent.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn plan(root: &Path, ops: Vec<PlanOp>) -> BuildPlan {
        BuildPlan {
            root: root.to_path_buf(),
            dir_sync: None,
            ops,
        }
    }

    #[test]
    fn test_valid_plan_passes() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("build")).unwrap();

        let p = plan(
            temp.path(),
            vec![
                PlanOp::Mkdir {
                    path: "public/data".into(),
                },
                PlanOp::Write {
                    path: "public/data/menu.json".into(),
                    content: "{}".into(),
                },
                PlanOp::Publish {
                    source: "build".into(),
                    target: "public/site".into(),
                },
            ],
        );

        preflight_checks(&p).unwrap();
    }

    #[test]
    fn test_missing_parent_fails() {
        let temp = TempDir::new().unwrap();
        let p = plan(
            temp.path(),
            vec![PlanOp::Write {
                path: "public/index.html".into(),
                content: "x".into(),
            }],
        );

        assert!(matches!(
            preflight_checks(&p),
            Err(BuildError::InvalidPlan(msg)) if msg.contains("mkdir")
        ));
    }

    #[test]
    fn test_escaping_root_fails() {
        let temp = TempDir::new().unwrap();
        let p = plan(
            temp.path(),
            vec![PlanOp::Write {
                path: "../outside.txt".into(),
                content: "x".into(),
            }],
        );

        assert!(matches!(
            preflight_checks(&p),
            Err(BuildError::InvalidPath(..))
        ));
    }

    #[test]
    fn test_artifact_target_fails() {
        let temp = TempDir::new().unwrap();
        let p = plan(
            temp.path(),
            vec![PlanOp::Write {
                path: "index.html.backup-1700000000000".into(),
                content: "x".into(),
            }],
        );

        assert!(preflight_checks(&p).is_err());
    }

    #[test]
    fn test_bad_sources_fail() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("file.txt"), "x").unwrap();

        let copy_missing = plan(
            temp.path(),
            vec![PlanOp::Copy {
                from: "missing.png".into(),
                to: "logo.png".into(),
            }],
        );
        assert!(preflight_checks(&copy_missing).is_err());

        let publish_file = plan(
            temp.path(),
            vec![PlanOp::Publish {
                source: "file.txt".into(),
                target: "site".into(),
            }],
        );
        assert!(preflight_checks(&publish_file).is_err());
    }

    #[test]
    fn test_overlapping_publish_targets_fail() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("build")).unwrap();

        let p = plan(
            temp.path(),
            vec![
                PlanOp::Publish {
                    source: "build".into(),
                    target: "public".into(),
                },
                PlanOp::Publish {
                    source: "build".into(),
                    target: "public/site".into(),
                },
            ],
        );

        assert!(matches!(
            preflight_checks(&p),
            Err(BuildError::InvalidPlan(msg)) if msg.contains("overlaps")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_symlink_out_of_root_fails() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        let p = plan(
            temp.path(),
            vec![PlanOp::Write {
                path: "link/escaped.html".into(),
                content: "x".into(),
            }],
        );

        assert!(matches!(
            preflight_checks(&p),
            Err(BuildError::InvalidPath(_, reason)) if reason.contains("outside root")
        ));
        assert!(!outside.path().join("escaped.html").exists());
    }

    #[test]
    fn test_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let p = plan(&temp.path().join("nope"), vec![]);
        assert!(preflight_checks(&p).is_err());
    }
}
