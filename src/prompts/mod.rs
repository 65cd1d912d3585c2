//! LLM prompts for solving and self-correcting DS-1000 problems.
//!
//! - [`solve`] - The solve prompt, its feedback blocks, and the
//!   chain-of-thought suggestion prompt

pub mod solve;

pub use solve::{
    compose, compose_suggestions, ComposedPrompt, RESULT_MISMATCH_MARKER, RUNTIME_FAILURE_MARKER,
    SOLVE_SYSTEM_PROMPT, SUGGESTION_SYSTEM_PROMPT,
};
