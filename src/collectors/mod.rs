//! External data source collectors.
//!
//! - [`stack_overflow`] - Streams tagged posts and their comments out of a
//!   Stack Exchange data dump for the retrieval corpus

pub mod stack_overflow;

pub use stack_overflow::{
    build_index, load_or_build_index, ExtractStats, IndexEntry, StackOverflowExtractor,
    StackOverflowPaths, DEFAULT_TAGS,
};
