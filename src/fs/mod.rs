//! File system operations with transaction support.
//!
//! Provides atomic file writes and staged directories that can be committed
//! or rolled back as a unit.

pub mod artifacts;
pub mod durability;
pub mod operation;
pub mod staged;
pub mod transaction;
pub mod writer;

pub use durability::{DirSync, WriterConfig, dir_sync_supported};
pub use operation::{OperationKind, OperationsSummary, WriteOperation};
pub use staged::StagedDirectory;
pub use transaction::{BuildTransaction, with_atomic_transaction, with_atomic_transaction_config};
pub use writer::AtomicFileWriter;
