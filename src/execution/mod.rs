//! Candidate execution layer.
//!
//! The self-correction loop only sees the [`Tester`] trait; [`PythonTester`]
//! is the local-interpreter implementation used by the batch runner.

pub mod tester;

pub use tester::{
    interpret_output, PythonTester, Tester, DEFAULT_PYTHON, DEFAULT_TEST_TIMEOUT_SECS,
};
