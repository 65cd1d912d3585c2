//! Shared utility functions for self-debug.
//!
//! This module provides common utilities used across multiple modules,
//! including code extraction from LLM responses.

pub mod code_extraction;

pub use code_extraction::{
    extract_code, extract_python_code_block, extract_untagged_code_block, find_code_block,
    try_extract_code, ExtractionFailure,
};

/// Truncate `s` to at most `max` bytes on a character boundary, marking the
/// cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}
