//! Command-line interface for self-debug.
//!
//! Provides commands for batch self-correction runs, accuracy reports, and
//! building the Stack Overflow retrieval corpus.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
