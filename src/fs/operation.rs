//! Records of applied (or attempted) file system mutations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide issue counter shared by every writer and staged directory.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Kind of mutation a [`WriteOperation`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    Write,
    Mkdir,
    Copy,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Write => "write",
            OperationKind::Mkdir => "mkdir",
            OperationKind::Copy => "copy",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file system mutation and what is needed to reverse it.
///
/// Rollback rule:
/// - `backup_path` present: rename the backup back onto `target`
/// - no backup and `!existed`: the target is new, delete it
/// - no backup and `existed`: nothing was changed, nothing to undo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOperation {
    /// Issue order; increases across all writers in the process.
    pub seq: u64,
    pub kind: OperationKind,
    pub target: PathBuf,
    /// Origin path, `copy` only.
    pub source: Option<PathBuf>,
    /// Size of the inline payload, `write` only.
    pub bytes: Option<u64>,
    pub backup_path: Option<PathBuf>,
    /// Whether something already existed at `target` beforehand.
    pub existed: bool,
    /// Primary effect durably applied.
    pub completed: bool,
}

impl WriteOperation {
    pub fn new(kind: OperationKind, target: impl Into<PathBuf>) -> Self {
        Self {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            kind,
            target: target.into(),
            source: None,
            bytes: None,
            backup_path: None,
            existed: false,
            completed: false,
        }
    }

    pub fn with_source(mut self, source: &Path) -> Self {
        self.source = Some(source.to_path_buf());
        self
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes as u64);
        self
    }

    pub fn with_backup(mut self, backup: Option<PathBuf>) -> Self {
        self.existed |= backup.is_some();
        self.backup_path = backup;
        self
    }

    pub fn existed(mut self, existed: bool) -> Self {
        self.existed = existed;
        self
    }

    pub(crate) fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    /// Human-readable one-line description.
    pub fn describe(&self) -> String {
        match (&self.kind, &self.source) {
            (OperationKind::Copy, Some(source)) => format!(
                "copy: {} → {}",
                source.display(),
                self.target.display()
            ),
            (kind, _) => format!("{}: {}", kind, self.target.display()),
        }
    }
}

/// Counts of recorded operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationsSummary {
    pub total: usize,
    pub completed: usize,
    pub types: BTreeMap<OperationKind, usize>,
}

impl OperationsSummary {
    pub fn from_operations<'a>(ops: impl IntoIterator<Item = &'a WriteOperation>) -> Self {
        let mut summary = Self::default();
        for op in ops {
            summary.total += 1;
            if op.completed {
                summary.completed += 1;
            }
            *summary.types.entry(op.kind).or_default() += 1;
        }
        summary
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.types.get(&kind).copied().unwrap_or(0)
    }
}

impl fmt::Display for OperationsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} completed", self.completed, self.total)?;
        if !self.types.is_empty() {
            let types: Vec<String> = self
                .types
                .iter()
                .map(|(kind, n)| format!("{kind}: {n}"))
                .collect();
            write!(f, " ({})", types.join(", "))?;
        }
        Ok(())
    }
}
