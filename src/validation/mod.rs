//! Validation of generated candidates.
//!
//! Candidates are checked for syntactic validity before they are accepted
//! for testing.

pub mod syntax;

pub use syntax::{
    PythonSyntaxValidator, SyntaxCheck, SyntaxValidator, DEFAULT_SYNTAX_TIMEOUT_SECS,
};
