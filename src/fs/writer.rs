//! Single-file atomic writes with reversible bookkeeping.
//!
//! ## Write protocol
//!
//! 1. Copy an existing target to `<name>.backup-<millis>` (synced)
//! 2. Create `.<name>.tmp-<pid>-<nonce>` next to the target with `create_new`
//! 3. Fill and `sync_all` the temp file
//! 4. `rename` the temp file over the target
//! 5. Sync the parent directory per [`DirSync`](super::DirSync)
//! 6. Record a completed [`WriteOperation`]
//!
//! A reader opening the target at any instant sees either the old bytes or
//! the new bytes, never a prefix and never a missing file. If any step
//! fails the temp file is removed and the backup renamed back, so the net
//! effect is nothing.
//!
//! Backups stay on disk until [`AtomicFileWriter::commit`] purges them or
//! [`AtomicFileWriter::rollback`] consumes them.

use super::artifacts;
use super::durability::WriterConfig;
use super::operation::{OperationKind, OperationsSummary, WriteOperation};
use crate::error::{BuildError, Result, RollbackFailure};

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Performs atomic writes and remembers how to undo them.
///
/// Operations up to `settled` belong to a committed batch and are never
/// rolled back; everything after it is pending.
#[derive(Debug, Default)]
pub struct AtomicFileWriter {
    operations: Vec<WriteOperation>,
    settled: usize,
    config: WriterConfig,
}

/// A failed publish, and whether the temp file had already replaced the target.
struct PublishFailure {
    error: BuildError,
    published: bool,
}

impl PublishFailure {
    fn before(error: BuildError) -> Self {
        Self {
            error,
            published: false,
        }
    }

    fn after(error: BuildError) -> Self {
        Self {
            error,
            published: true,
        }
    }
}

impl AtomicFileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WriterConfig) -> Self {
        Self {
            operations: Vec::new(),
            settled: 0,
            config,
        }
    }

    pub fn config(&self) -> WriterConfig {
        self.config
    }

    /// All recorded operations, oldest first.
    pub fn operations(&self) -> &[WriteOperation] {
        &self.operations
    }

    /// Operations that a rollback would still undo.
    pub fn pending(&self) -> &[WriteOperation] {
        &self.operations[self.settled..]
    }

    pub fn operations_summary(&self) -> OperationsSummary {
        OperationsSummary::from_operations(&self.operations)
    }

    /// Atomically replaces `path` with `content`.
    ///
    /// The parent directory must already exist.
    pub fn write_file_atomic(
        &mut self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
    ) -> Result<()> {
        let path = path.as_ref();
        let content = content.as_ref();
        log::debug!("Writing {} ({} bytes)", path.display(), content.len());

        let op = WriteOperation::new(OperationKind::Write, path).with_bytes(content.len());
        self.replace(op, |file| file.write_all(content))
    }

    /// Atomically replaces `target` with a copy of `source`.
    ///
    /// Permissions of `source` are carried over.
    pub fn copy_file(&mut self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<()> {
        let source = source.as_ref();
        let target = target.as_ref();
        log::debug!("Copying {} → {}", source.display(), target.display());

        let permissions = fs::metadata(source)
            .map_err(|e| BuildError::atomic(source, e))?
            .permissions();

        let op = WriteOperation::new(OperationKind::Copy, target).with_source(source);
        self.replace(op, |file| {
            let mut input = File::open(source)?;
            io::copy(&mut input, file)?;
            file.set_permissions(permissions)
        })
    }

    /// Creates `path` and any missing parents.
    ///
    /// The recorded target is the outermost directory actually created, so a
    /// rollback removes exactly what this call added. An existing directory
    /// is recorded as a no-op.
    pub fn create_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => {
                log::debug!("Directory already exists: {}", path.display());
                self.operations.push(
                    WriteOperation::new(OperationKind::Mkdir, path)
                        .existed(true)
                        .completed(),
                );
                return Ok(());
            }
            Ok(_) => {
                return Err(BuildError::atomic(
                    path,
                    io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::atomic(path, e)),
        }

        let top = topmost_missing(path);
        let idx = self.record(WriteOperation::new(OperationKind::Mkdir, &top));

        let created = fs::create_dir_all(path)
            .map_err(|e| BuildError::atomic(path, e))
            .and_then(|_| self.config.dir_sync.sync_parent(&top));

        if let Err(e) = created {
            if let Err(cleanup) = remove_path(&top) {
                log::warn!("Failed to remove {}: {}", top.display(), cleanup);
            }
            return Err(e);
        }

        self.operations[idx].completed = true;
        log::debug!("Created directory: {}", path.display());
        Ok(())
    }

    /// Removes the file at `path`, keeping it as a backup until commit.
    ///
    /// The file is moved aside with a single rename, so no copy is made.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let meta = fs::symlink_metadata(path).map_err(|e| BuildError::atomic(path, e))?;
        if meta.is_dir() {
            return Err(BuildError::atomic(
                path,
                io::Error::new(io::ErrorKind::IsADirectory, "cannot remove a directory"),
            ));
        }

        let backup = artifacts::backup_path(path)?;
        let idx = self.record(WriteOperation::new(OperationKind::Delete, path).existed(true));

        fs::rename(path, &backup).map_err(|e| BuildError::atomic(path, e))?;

        if let Err(e) = self.config.dir_sync.sync_parent(path) {
            if let Err(restore) = fs::rename(&backup, path) {
                log::error!(
                    "Failed to restore {} from {}: {}",
                    path.display(),
                    backup.display(),
                    restore
                );
            }
            return Err(e);
        }

        let op = &mut self.operations[idx];
        op.backup_path = Some(backup);
        op.completed = true;
        log::debug!("Removed: {}", path.display());
        Ok(())
    }

    /// Settles all pending operations and deletes their backups.
    ///
    /// Backup deletion is best-effort; failures are logged and leave an
    /// orphaned artifact behind.
    pub fn commit(&mut self) {
        for op in &mut self.operations[self.settled..] {
            if let Some(backup) = op.backup_path.take() {
                match remove_path(&backup) {
                    Ok(()) => log::debug!("Removed backup: {}", backup.display()),
                    Err(e) => log::warn!("Failed to remove backup {}: {}", backup.display(), e),
                }
            }
        }
        self.settled = self.operations.len();
    }

    /// Undoes all pending operations, newest first.
    ///
    /// Every operation is attempted even if an earlier one fails; all
    /// failures are reported together.
    pub fn rollback(&mut self) -> Result<()> {
        let pending = self.operations.split_off(self.settled);
        if pending.is_empty() {
            return Ok(());
        }

        log::info!("Rolling back {} operations", pending.len());

        let mut failures = Vec::new();
        for op in pending.iter().rev() {
            if !op.completed {
                continue;
            }

            match self.undo(op) {
                Ok(()) => log::debug!("Reverted {}", op.describe()),
                Err(source) => {
                    log::error!("Failed to revert {}: {}", op.describe(), source);
                    failures.push(RollbackFailure {
                        path: op.target.clone(),
                        source,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BuildError::RollbackFailed(failures))
        }
    }

    fn record(&mut self, op: WriteOperation) -> usize {
        self.operations.push(op);
        self.operations.len() - 1
    }

    fn undo(&self, op: &WriteOperation) -> io::Result<()> {
        match (&op.backup_path, op.existed) {
            (Some(backup), _) => fs::rename(backup, &op.target)?,
            (None, false) => remove_path(&op.target)?,
            (None, true) => return Ok(()),
        }

        if let Err(e) = self.config.dir_sync.sync_parent(&op.target) {
            log::warn!("{}", e);
        }
        Ok(())
    }

    fn replace(
        &mut self,
        op: WriteOperation,
        fill: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> Result<()> {
        let target = op.target.clone();
        let existed = fs::symlink_metadata(&target).is_ok();

        let backup = self.backup_existing(&target)?;
        let idx = self.record(op.existed(existed).with_backup(backup.clone()));

        match self.publish_temp(&target, fill) {
            Ok(()) => {
                self.operations[idx].completed = true;
                log::debug!("Wrote: {}", target.display());
                Ok(())
            }
            Err(failure) => {
                restore_after_failure(&target, backup.as_deref(), failure.published, existed);
                self.operations[idx].backup_path = None;
                Err(failure.error)
            }
        }
    }

    /// Preserves whatever non-directory entry sits at `target`, leaving the
    /// target itself in place. Returns `None` if there is nothing to preserve.
    ///
    /// Regular files are copied, symlinks are recreated, anything else is
    /// hard-linked.
    fn backup_existing(&self, target: &Path) -> Result<Option<PathBuf>> {
        let meta = match fs::symlink_metadata(target) {
            Ok(meta) if meta.is_dir() => return Ok(None),
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BuildError::atomic(target, e)),
        };

        let backup = artifacts::backup_path(target)?;
        let saved = if meta.file_type().is_symlink() {
            copy_symlink(target, &backup)
        } else if meta.is_file() {
            fs::copy(target, &backup).and_then(|_| File::open(&backup)?.sync_all())
        } else {
            fs::hard_link(target, &backup)
        };

        if let Err(e) = saved {
            if let Err(cleanup) = remove_path(&backup) {
                log::warn!(
                    "Failed to remove partial backup {}: {}",
                    backup.display(),
                    cleanup
                );
            }
            return Err(BuildError::atomic(target, e));
        }

        log::debug!("Backed up {} → {}", target.display(), backup.display());
        Ok(Some(backup))
    }

    fn publish_temp(
        &self,
        target: &Path,
        fill: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> std::result::Result<(), PublishFailure> {
        let temp = artifacts::temp_path(target).map_err(PublishFailure::before)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|e| PublishFailure::before(BuildError::atomic(target, e)))?;

        let written = fill(&mut file).and_then(|_| file.sync_all());
        drop(file);

        if let Err(e) = written {
            remove_temp(&temp);
            return Err(PublishFailure::before(BuildError::atomic(target, e)));
        }

        if let Err(e) = fs::rename(&temp, target) {
            remove_temp(&temp);
            return Err(PublishFailure::before(BuildError::atomic(target, e)));
        }

        self.config
            .dir_sync
            .sync_parent(target)
            .map_err(PublishFailure::after)
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        let orphaned = self
            .pending()
            .iter()
            .filter(|op| op.backup_path.is_some())
            .count();
        if orphaned > 0 {
            log::warn!(
                "AtomicFileWriter dropped with {} uncommitted backups",
                orphaned
            );
        }
    }
}

fn restore_after_failure(target: &Path, backup: Option<&Path>, published: bool, existed: bool) {
    let restored = match backup {
        Some(backup) => fs::rename(backup, target),
        None if published && !existed => remove_path(target),
        None => Ok(()),
    };

    if let Err(e) = restored {
        log::error!("Failed to restore {} after error: {}", target.display(), e);
    }
}

/// Creates a symlink at `dest` with the same contents as the link at `link`.
#[cfg(unix)]
fn copy_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, dest)
}

#[cfg(windows)]
fn copy_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    let pointee = fs::read_link(link)?;
    let resolved = match link.parent() {
        Some(parent) => parent.join(&pointee),
        None => pointee.clone(),
    };
    if resolved.is_dir() {
        symlink_dir(pointee, dest)
    } else {
        symlink_file(pointee, dest)
    }
}

#[cfg(not(any(unix, windows)))]
fn copy_symlink(_link: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "cannot back up a symlink on this platform",
    ))
}

fn remove_temp(temp: &Path) {
    if let Err(e) = fs::remove_file(temp) {
        log::warn!("Failed to remove temp file {}: {}", temp.display(), e);
    }
}

/// Removes a file or directory tree; a missing path is not an error.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn topmost_missing(path: &Path) -> PathBuf {
    let mut top = path.to_path_buf();
    for ancestor in path.ancestors().skip(1) {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        top = ancestor.to_path_buf();
    }
    top
}
