//! Directory trees built in isolation and published with a single rename.
//!
//! A [`StagedDirectory`] owns a sibling directory named
//! `<target>.staging-<pid>-<millis>`. Callers populate it (through the
//! helpers here or with ordinary I/O under [`StagedDirectory::staging_path`])
//! and then commit:
//!
//! 1. Rename an existing target aside to `<target>.backup-<millis>`
//! 2. Rename the staging directory onto the target
//! 3. Sync the parent directory
//! 4. Delete the backup
//!
//! Steps 1-3 are [`publish`](StagedDirectory::publish), step 4 is
//! [`finalize`](StagedDirectory::finalize). A transaction publishes every
//! staged directory before finalizing any of them, so a failure partway
//! through can still swap the earlier ones back.

use super::artifacts;
use super::durability::WriterConfig;
use super::operation::{OperationKind, OperationsSummary, WriteOperation};
use super::writer::remove_path;
use crate::error::{BuildError, Result};
use crate::verify::rules::validate_relative_path;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StagedState {
    /// Accepting writes.
    Open,
    /// Renamed into place; previous target still held as a backup.
    Published,
    /// New tree moved back to the staging path; previous target not yet
    /// restored from its backup.
    Unpublishing,
    /// Backup discarded. Terminal.
    Committed,
    /// Staging directory discarded. Terminal.
    RolledBack,
}

/// A directory tree staged next to its eventual location.
#[derive(Debug)]
pub struct StagedDirectory {
    staging_path: PathBuf,
    target_path: PathBuf,
    operations: Vec<WriteOperation>,
    backup_path: Option<PathBuf>,
    state: StagedState,
    config: WriterConfig,
}

impl StagedDirectory {
    /// Creates an empty staging directory for `target_path`.
    ///
    /// Missing parents of the target are created; the target itself is not
    /// touched.
    pub fn create(target_path: impl Into<PathBuf>) -> Result<Self> {
        Self::create_with_config(target_path, WriterConfig::default())
    }

    pub fn create_with_config(target_path: impl Into<PathBuf>, config: WriterConfig) -> Result<Self> {
        let target_path = target_path.into();
        let staging_path = artifacts::staging_path(&target_path)?;

        if let Some(parent) = staging_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| BuildError::atomic(parent, e))?;
            }
        }
        fs::create_dir(&staging_path).map_err(|e| BuildError::atomic(&staging_path, e))?;

        log::debug!(
            "Staging {} in {}",
            target_path.display(),
            staging_path.display()
        );

        Ok(Self {
            staging_path,
            target_path,
            operations: Vec::new(),
            backup_path: None,
            state: StagedState::Open,
            config,
        })
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn operations(&self) -> &[WriteOperation] {
        &self.operations
    }

    pub fn operations_summary(&self) -> OperationsSummary {
        OperationsSummary::from_operations(&self.operations)
    }

    pub fn is_committed(&self) -> bool {
        self.state == StagedState::Committed
    }

    /// Writes `content` to `relative` inside the staging tree.
    ///
    /// Missing parent directories are created.
    pub fn write_file(
        &mut self,
        relative: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
    ) -> Result<PathBuf> {
        let path = self.prepare(relative.as_ref())?;
        let content = content.as_ref();

        fs::write(&path, content).map_err(|e| BuildError::atomic(&path, e))?;
        self.operations.push(
            WriteOperation::new(OperationKind::Write, &path)
                .with_bytes(content.len())
                .completed(),
        );
        Ok(path)
    }

    /// Copies `source` to `relative` inside the staging tree.
    pub fn copy_file(
        &mut self,
        source: impl AsRef<Path>,
        relative: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let source = source.as_ref();
        let path = self.prepare(relative.as_ref())?;

        fs::copy(source, &path).map_err(|e| BuildError::atomic(&path, e))?;
        self.operations.push(
            WriteOperation::new(OperationKind::Copy, &path)
                .with_source(source)
                .completed(),
        );
        Ok(path)
    }

    /// Creates `relative` (and parents) inside the staging tree.
    pub fn create_directory(&mut self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        self.ensure_open()?;
        let relative = relative.as_ref();
        validate_relative_path(relative)?;

        let path = self.staging_path.join(relative);
        let existed = path.is_dir();
        fs::create_dir_all(&path).map_err(|e| BuildError::atomic(&path, e))?;
        self.operations.push(
            WriteOperation::new(OperationKind::Mkdir, &path)
                .existed(existed)
                .completed(),
        );
        Ok(path)
    }

    /// Publishes and finalizes in one step.
    pub fn commit(&mut self) -> Result<()> {
        self.publish()?;
        self.finalize();
        Ok(())
    }

    /// Renames the staging tree onto the target, keeping any replaced
    /// directory as a backup.
    ///
    /// On failure the previous target is put back, the staging directory is
    /// removed, and the handle becomes terminal.
    pub fn publish(&mut self) -> Result<()> {
        self.ensure_open()?;

        let backup = match self.move_target_aside() {
            Ok(backup) => backup,
            Err(e) => {
                self.discard_staging();
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&self.staging_path, &self.target_path) {
            self.restore_target(backup.as_deref());
            self.discard_staging();
            return Err(BuildError::atomic(&self.target_path, e));
        }

        self.backup_path = backup;
        self.state = StagedState::Published;

        if let Err(e) = self.config.dir_sync.sync_parent(&self.target_path) {
            // Keep tracking the backup if the swap back fails, so a later
            // rollback can retry it
            match self.unpublish() {
                Ok(()) => self.discard_staging(),
                Err(undo) => log::error!("{}", undo),
            }
            return Err(e);
        }

        log::debug!("Published {}", self.target_path.display());
        Ok(())
    }

    /// Deletes the backup of a published directory. Best-effort.
    pub fn finalize(&mut self) {
        if self.state != StagedState::Published {
            return;
        }

        if let Some(backup) = self.backup_path.take() {
            if let Err(e) = remove_path(&backup) {
                log::warn!("Failed to remove backup {}: {}", backup.display(), e);
            }
        }

        self.state = StagedState::Committed;
        log::info!("Committed {}", self.target_path.display());
    }

    /// Reverses [`publish`](Self::publish): moves the new tree back to the
    /// staging path and restores the previous target.
    ///
    /// Leaves the handle open, so a following [`rollback`](Self::rollback)
    /// discards the staged tree.
    ///
    /// Safe to call again after a failure: each step is recorded as it
    /// completes, and the backup is forgotten only once it has been renamed
    /// back onto the target.
    pub fn unpublish(&mut self) -> Result<()> {
        match self.state {
            StagedState::Published => {
                fs::rename(&self.target_path, &self.staging_path)
                    .map_err(|e| BuildError::atomic(&self.target_path, e))?;
                self.state = StagedState::Unpublishing;
            }
            StagedState::Unpublishing => {}
            _ => return Ok(()),
        }

        if let Some(backup) = &self.backup_path {
            fs::rename(backup, &self.target_path).map_err(|e| BuildError::atomic(backup, e))?;
        }

        self.backup_path = None;
        self.state = StagedState::Open;
        log::debug!("Unpublished {}", self.target_path.display());
        Ok(())
    }

    /// Discards the staging directory. The target is left as it was before
    /// staging began.
    ///
    /// Only a failure to unpublish is an error; staging cleanup failures
    /// are logged.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            StagedState::Committed => {
                log::warn!(
                    "Cannot roll back committed directory {}",
                    self.target_path.display()
                );
                return Ok(());
            }
            StagedState::RolledBack => return Ok(()),
            StagedState::Published | StagedState::Unpublishing => self.unpublish()?,
            StagedState::Open => {}
        }

        self.discard_staging();
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == StagedState::Open {
            Ok(())
        } else {
            Err(BuildError::TransactionClosed)
        }
    }

    fn prepare(&self, relative: &Path) -> Result<PathBuf> {
        self.ensure_open()?;
        validate_relative_path(relative)?;

        let path = self.staging_path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::atomic(parent, e))?;
        }
        Ok(path)
    }

    fn move_target_aside(&self) -> Result<Option<PathBuf>> {
        match fs::symlink_metadata(&self.target_path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BuildError::atomic(&self.target_path, e)),
        }

        let backup = artifacts::backup_path(&self.target_path)?;
        fs::rename(&self.target_path, &backup)
            .map_err(|e| BuildError::atomic(&self.target_path, e))?;

        log::debug!(
            "Moved {} aside to {}",
            self.target_path.display(),
            backup.display()
        );
        Ok(Some(backup))
    }

    fn restore_target(&self, backup: Option<&Path>) {
        let Some(backup) = backup else {
            return;
        };

        if let Err(e) = remove_path(&self.target_path) {
            log::error!(
                "Failed to clear {} before restore: {}",
                self.target_path.display(),
                e
            );
        }
        if let Err(e) = fs::rename(backup, &self.target_path) {
            log::error!(
                "Failed to restore {} from {}: {}",
                self.target_path.display(),
                backup.display(),
                e
            );
        }
    }

    fn discard_staging(&mut self) {
        if let Err(e) = remove_path(&self.staging_path) {
            log::warn!(
                "Failed to remove staging directory {}: {}",
                self.staging_path.display(),
                e
            );
        }
        self.state = StagedState::RolledBack;
    }
}

impl Drop for StagedDirectory {
    fn drop(&mut self) {
        if matches!(
            self.state,
            StagedState::Open | StagedState::Published | StagedState::Unpublishing
        ) {
            log::warn!(
                "Staged directory for {} dropped without commit; discarding",
                self.target_path.display()
            );
            if let Err(e) = self.rollback() {
                log::error!("{}", e);
            }
        }
    }
}
