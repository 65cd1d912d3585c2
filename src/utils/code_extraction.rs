//! Code extraction from LLM responses.
//!
//! A response is expected to carry its solution inside a fenced code block.
//! Extraction tries, in order:
//! 1. The first ```` ```python ```` (or ```` ```py ````) block
//! 2. The first untagged ```` ``` ```` block
//!
//! The block contents are returned verbatim and must pass a
//! [`SyntaxValidator`] before they are accepted as a candidate.
//!
//! # Example
//!
//! ```
//! use self_debug::utils::code_extraction::find_code_block;
//!
//! let response = "Here you go:\n```python\nresult = df.sum()\n```\nDone.";
//! assert_eq!(find_code_block(response).as_deref(), Some("result = df.sum()"));
//!
//! assert_eq!(find_code_block("I cannot help with that."), None);
//! ```

use regex::Regex;
use thiserror::Error;

use crate::validation::{SyntaxCheck, SyntaxValidator};

/// Reason a response did not yield a usable candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionFailure {
    #[error("No fenced code block found in response")]
    NoCodeBlock,
    #[error("Extracted code has a syntax error on line {line}: {message}")]
    InvalidSyntax {
        line: usize,
        message: String,
        code: String,
    },
    #[error("Extracted code could not be syntax checked: {reason}")]
    Unchecked { reason: String },
    #[error("Syntax validator unavailable: {reason}")]
    ValidatorUnavailable { reason: String },
}

/// Extract the contents of the first Python-tagged code block.
pub fn extract_python_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:python|py)[ \t]*\r?\n([\s\S]*?)\r?\n[ \t]*```").ok()?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract the contents of the first code block without a language tag.
pub fn extract_untagged_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```[ \t]*\r?\n([\s\S]*?)\r?\n[ \t]*```").ok()?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// The fenced region a candidate would be taken from, unchecked.
pub fn find_code_block(content: &str) -> Option<String> {
    extract_python_code_block(content).or_else(|| extract_untagged_code_block(content))
}

/// Extract a syntactically valid candidate from a response, reporting why
/// extraction failed otherwise.
pub async fn try_extract_code(
    content: &str,
    validator: &dyn SyntaxValidator,
) -> Result<String, ExtractionFailure> {
    let code = find_code_block(content).ok_or(ExtractionFailure::NoCodeBlock)?;

    match validator.validate(&code).await {
        Ok(SyntaxCheck::Success) => Ok(code),
        Ok(SyntaxCheck::Error { line, message }) => {
            Err(ExtractionFailure::InvalidSyntax { line, message, code })
        }
        Err(err) if err.is_unavailable() => Err(ExtractionFailure::ValidatorUnavailable {
            reason: err.to_string(),
        }),
        Err(err) => Err(ExtractionFailure::Unchecked {
            reason: err.to_string(),
        }),
    }
}

/// Extract a syntactically valid candidate from a response.
///
/// Returns `None` when no code block is present or when the block does not
/// compile.
pub async fn extract_code(content: &str, validator: &dyn SyntaxValidator) -> Option<String> {
    try_extract_code(content, validator).await.ok()
}
