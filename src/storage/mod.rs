//! Run artifacts and resumability.
//!
//! - [`checkpoint`] - Per-problem artifacts and the "already resolved" query
//! - [`report`] - Per-library accuracy over recorded verdicts

pub mod checkpoint;
pub mod report;

pub use checkpoint::{CheckpointStore, FsCheckpointStore};
pub use report::{accuracy_by_library, LibraryAccuracy};
