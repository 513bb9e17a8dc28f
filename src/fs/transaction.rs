//! Multi-operation build transactions with rollback support.
//!
//! Coordinates file writes and staged directories that must succeed or fail
//! as a unit.
//!
//! ## Execution Guarantees
//!
//! - **Durability**: Each file operation is applied atomically and durably
//!   when it is issued
//! - **Reversibility**: Every applied operation is recorded with enough
//!   state to undo it
//! - **Ordering**: Rollback runs strictly in reverse: staged directories
//!   (newest first), then file operations (newest first)
//! - **Scoped cleanup**: Dropping an uncommitted transaction rolls it back
//!
//! ## Commit Phases
//!
//! 1. **Publish**: Rename every staged directory into place, in
//!    registration order, keeping each replaced directory as a backup
//! 2. **Finalize**: Delete directory backups and file backups
//!
//! If any publish fails, the directories already published are swapped
//! back (newest first) before the transaction rolls back, so a transaction
//! with several staged directories is all-or-nothing across all of them.
//! Only a crash between the phases can leave a mix of old and new
//! directories; the backups it leaves behind are found by `clean`.
//!
//! Concurrent transactions writing the *same* path are not coordinated.
//!
//! ## Example
//!
//! ```no_run
//! # use atomic_build::fs::with_atomic_transaction;
//! # fn example() -> atomic_build::error::Result<()> {
//! with_atomic_transaction(|txn| {
//!     txn.write_file("public/menu.json", r#"{"items": []}"#)?;
//!
//!     let site = txn.create_staged_directory("public/site")?;
//!     site.write_file("index.html", "<h1>Today</h1>")?;
//!     Ok(())
//! })?; // Commit, or roll back and return the error
//! # Ok(())
//! # }
//! ```

use super::durability::WriterConfig;
use super::operation::{OperationKind, OperationsSummary, WriteOperation};
use super::staged::StagedDirectory;
use super::writer::AtomicFileWriter;
use crate::error::{BuildError, Result, RollbackFailure};

use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    /// Accepting operations.
    Open,
    /// All operations committed; rollback refused.
    Committed,
    /// Rolled back, explicitly or after a failed commit.
    RolledBack,
}

/// Transaction spanning file writes and staged directories.
///
/// File operations take effect immediately; the transaction records them
/// so they can be undone. Staged directories become visible on
/// [`commit`](Self::commit).
#[must_use = "BuildTransaction must be committed; dropping it rolls back"]
pub struct BuildTransaction {
    writer: AtomicFileWriter,
    staged: Vec<StagedDirectory>,
    state: TransactionState,
    config: WriterConfig,
}

impl Default for BuildTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildTransaction {
    pub fn new() -> Self {
        Self::with_config(WriterConfig::default())
    }

    pub fn with_config(config: WriterConfig) -> Self {
        Self {
            writer: AtomicFileWriter::with_config(config),
            staged: Vec::new(),
            state: TransactionState::Open,
            config,
        }
    }

    /// Returns true if successfully committed.
    pub fn is_committed(&self) -> bool {
        self.state == TransactionState::Committed
    }

    pub fn len(&self) -> usize {
        self.operations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.operations().is_empty() && self.staged.is_empty()
    }

    /// Flat list of recorded operations across the writer and every staged
    /// directory, in the order they were issued.
    pub fn operations(&self) -> Vec<&WriteOperation> {
        let mut ops: Vec<&WriteOperation> = self
            .writer
            .operations()
            .iter()
            .chain(self.staged.iter().flat_map(|s| s.operations()))
            .collect();
        ops.sort_by_key(|op| op.seq);
        ops
    }

    pub fn staged_directories(&self) -> &[StagedDirectory] {
        &self.staged
    }

    pub fn operations_summary(&self) -> OperationsSummary {
        OperationsSummary::from_operations(self.operations())
    }

    /// Returns human-readable preview of operations.
    pub fn preview(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .map(WriteOperation::describe)
            .chain(
                self.staged
                    .iter()
                    .map(|s| format!("publish: {}", s.target_path().display())),
            )
            .collect()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == TransactionState::Open {
            Ok(())
        } else {
            Err(BuildError::TransactionClosed)
        }
    }

    pub fn write_file(&mut self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        self.writer.write_file_atomic(path, content)
    }

    pub fn copy_file(&mut self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<()> {
        self.ensure_open()?;
        self.writer.copy_file(source, target)
    }

    pub fn create_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_open()?;
        self.writer.create_directory(path)
    }

    pub fn remove_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_open()?;
        self.writer.remove_file(path)
    }

    /// Creates a staged directory for `target` and registers it for commit.
    ///
    /// Targets must not repeat or nest inside one another, since publishing
    /// one would move the other's target out from under it.
    pub fn create_staged_directory(
        &mut self,
        target: impl Into<PathBuf>,
    ) -> Result<&mut StagedDirectory> {
        self.ensure_open()?;
        let target = target.into();

        if let Some(existing) = self.staged.iter().find(|s| {
            s.target_path().starts_with(&target) || target.starts_with(s.target_path())
        }) {
            return Err(BuildError::InvalidPath(
                target.display().to_string(),
                format!(
                    "overlaps staged directory {}",
                    existing.target_path().display()
                ),
            ));
        }

        let staged = StagedDirectory::create_with_config(target, self.config)?;
        let idx = self.staged.len();
        self.staged.push(staged);
        Ok(&mut self.staged[idx])
    }

    /// Looks up a registered staged directory by its target path.
    pub fn staged_directory(&mut self, target: impl AsRef<Path>) -> Option<&mut StagedDirectory> {
        let target = target.as_ref();
        self.staged.iter_mut().find(|s| s.target_path() == target)
    }

    /// Commits all staged directories and settles all file operations.
    ///
    /// On failure, rolls back automatically and returns the original error.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;

        for idx in 0..self.staged.len() {
            if let Err(e) = self.staged[idx].publish() {
                log::error!("Commit failed: {}", e);

                for earlier in self.staged[..idx].iter_mut().rev() {
                    if let Err(undo) = earlier.unpublish() {
                        log::error!("Failed to unpublish: {}", undo);
                    }
                }

                if let Err(rollback_err) = self.rollback() {
                    log::error!("Rollback after failed commit: {}", rollback_err);
                }
                return Err(e);
            }
        }

        for staged in &mut self.staged {
            staged.finalize();
        }
        self.writer.commit();

        self.state = TransactionState::Committed;
        log::info!("Transaction committed: {}", self.operations_summary());
        Ok(())
    }

    /// Rolls back everything applied so far, newest first.
    ///
    /// Refused (with a warning) once the transaction has committed.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Committed => {
                log::warn!("Transaction already committed; rollback ignored");
                return Ok(());
            }
            TransactionState::RolledBack => return Ok(()),
            TransactionState::Open => {}
        }

        let mut failures = Vec::new();

        for staged in self.staged.iter_mut().rev() {
            if let Err(e) = staged.rollback() {
                failures.push(into_failure(staged.target_path(), e));
            }
        }

        match self.writer.rollback() {
            Ok(()) => {}
            Err(BuildError::RollbackFailed(mut more)) => failures.append(&mut more),
            Err(e) => failures.push(into_failure(Path::new(""), e)),
        }

        self.state = TransactionState::RolledBack;

        if failures.is_empty() {
            log::info!("Rollback completed");
            Ok(())
        } else {
            Err(BuildError::RollbackFailed(failures))
        }
    }

    /// Prints categorized summary to stdout.
    ///
    /// Paths are relative to `root` with forward slashes.
    pub fn print_summary(&self, root: &Path) {
        if self.is_empty() {
            println!("\n{}", "No changes needed".yellow());
            return;
        }

        let display_path = |path: &Path| -> String {
            let relative = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
            relative.to_string_lossy().replace('\\', "/")
        };

        let mut written = Vec::new();
        let mut copied = Vec::new();
        let mut created = Vec::new();
        let mut removed = Vec::new();

        for op in self.writer.operations().iter().filter(|op| op.completed) {
            match op.kind {
                OperationKind::Write => written.push(display_path(&op.target)),
                OperationKind::Copy => copied.push(display_path(&op.target)),
                OperationKind::Mkdir if !op.existed => created.push(display_path(&op.target)),
                OperationKind::Mkdir => {}
                OperationKind::Delete => removed.push(display_path(&op.target)),
            }
        }

        let published: Vec<(String, usize)> = self
            .staged
            .iter()
            .map(|s| (display_path(s.target_path()), s.operations().len()))
            .collect();

        if self.is_committed() {
            println!("\n{}", "Changes applied:".green().bold());
        } else {
            println!("\n{}", "Changes pending:".yellow().bold());
        }

        if !published.is_empty() {
            println!("\n{} Published directories", "📁".bold());
            for (path, entries) in &published {
                println!(
                    "   {} {} {}",
                    "✓".green(),
                    path,
                    format!("({} entries)", entries).dimmed()
                );
            }
        }

        print_group("📝", "Written", &written, 8);
        print_group("📋", "Copied", &copied, 8);
        print_group("📂", "Directories created", &created, 5);
        print_group("🗑", "Removed", &removed, 5);

        println!();
        println!(
            "{} Successfully completed {} operations",
            "✓".green().bold(),
            self.operations_summary().completed
        );
    }
}

impl Drop for BuildTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Open && !self.is_empty() {
            log::warn!("Transaction dropped without commit; rolling back");
            if let Err(e) = self.rollback() {
                log::error!("{}", e);
            }
        }
    }
}

fn print_group(icon: &str, title: &str, paths: &[String], limit: usize) {
    if paths.is_empty() {
        return;
    }

    println!(
        "\n{} {} ({} file{})",
        icon.bold(),
        title,
        paths.len(),
        if paths.len() == 1 { "" } else { "s" }
    );
    for path in paths.iter().take(limit) {
        println!("   {} {}", "✓".green(), path.dimmed());
    }
    if paths.len() > limit {
        println!("   {} {} more...", "✓".green(), paths.len() - limit);
    }
}

fn into_failure(path: &Path, err: BuildError) -> RollbackFailure {
    match err {
        BuildError::AtomicWrite { path, source } => RollbackFailure { path, source },
        other => RollbackFailure {
            path: path.to_path_buf(),
            source: std::io::Error::other(other.to_string()),
        },
    }
}

/// Runs `f` inside a transaction: commits on success, rolls back and
/// returns the error on any failure from `f` or from the commit.
pub fn with_atomic_transaction<T, F>(f: F) -> Result<T>
where
    F: FnOnce(&mut BuildTransaction) -> Result<T>,
{
    with_atomic_transaction_config(WriterConfig::default(), f)
}

/// [`with_atomic_transaction`] with explicit writer settings.
pub fn with_atomic_transaction_config<T, F>(config: WriterConfig, f: F) -> Result<T>
where
    F: FnOnce(&mut BuildTransaction) -> Result<T>,
{
    let mut txn = BuildTransaction::with_config(config);

    match f(&mut txn) {
        Ok(value) => {
            txn.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = txn.rollback() {
                log::error!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}
