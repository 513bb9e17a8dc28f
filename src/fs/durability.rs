//! Directory metadata sync policy.
//!
//! A rename is only durable once the containing directory's entry table has
//! reached stable storage. Not every platform can open a directory for
//! syncing, so the behavior is chosen up front through [`DirSync`] instead
//! of being decided by whatever error the platform happens to return.

use crate::error::{BuildError, Result};
use std::fs::File;
use std::path::Path;

/// How to treat the parent-directory sync that follows a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DirSync {
    /// Unsupported platforms and sync failures are errors.
    Strict,
    /// Skip silently where unsupported; log failures as warnings.
    #[default]
    BestEffort,
    /// Never sync directories.
    Skip,
}

/// Returns `true` if this platform can sync directory metadata.
pub fn dir_sync_supported() -> bool {
    cfg!(unix)
}

/// Writer settings shared by every component of a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterConfig {
    pub dir_sync: DirSync,
}

impl WriterConfig {
    pub fn strict() -> Self {
        Self {
            dir_sync: DirSync::Strict,
        }
    }
}

impl DirSync {
    /// Parses a policy name as written in plan files (`"best-effort"` etc.).
    pub fn parse(name: &str) -> Option<Self> {
        <Self as clap::ValueEnum>::from_str(name, true).ok()
    }

    /// Syncs `dir` according to the policy.
    pub fn sync_dir(self, dir: &Path) -> Result<()> {
        match self {
            DirSync::Skip => Ok(()),
            DirSync::Strict => {
                if !dir_sync_supported() {
                    return Err(BuildError::DirSyncUnsupported(dir.to_path_buf()));
                }
                fsync_dir(dir).map_err(|e| BuildError::atomic(dir, e))
            }
            DirSync::BestEffort => {
                if !dir_sync_supported() {
                    log::debug!("Directory sync unsupported, skipping: {}", dir.display());
                    return Ok(());
                }
                if let Err(e) = fsync_dir(dir) {
                    log::warn!("Failed to sync directory {}: {}", dir.display(), e);
                }
                Ok(())
            }
        }
    }

    /// Syncs the directory containing `path`.
    pub fn sync_parent(self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        self.sync_dir(parent)
    }
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}
