//! Error types for self-debug operations.
//!
//! Defines error types for the major subsystems:
//! - LLM API interactions (chat completions and embeddings)
//! - DS-1000 dataset loading
//! - Prompt rendering and candidate generation
//! - Candidate testing
//! - Checkpoint and artifact storage
//! - Stack Overflow extraction and retrieval

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set OPENROUTER_API_KEY or LITELLM_API_KEY")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Response contained no choices")]
    EmptyResponse,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request rejected by content policy: {0}")]
    ContentFiltered(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Whether the failure is worth retrying against the same endpoint.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("connection")
                    || msg.contains("temporarily")
            }
            LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }

    /// Whether the endpoint turned down this particular request, so a
    /// different request may still succeed.
    ///
    /// Covers content-policy and other 400-class rejections (context length,
    /// payload size) and empty completions. Missing keys and auth failures
    /// are not rejections.
    pub fn is_request_rejection(&self) -> bool {
        match self {
            LlmError::ContentFiltered(_) | LlmError::EmptyResponse => true,
            LlmError::ApiError { code, .. } => matches!(code, 400 | 413 | 422),
            _ => false,
        }
    }
}

/// Errors that can occur while loading benchmark problems.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset file not found: {0}")]
    NotFound(String),

    #[error("Malformed problem on line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Unknown library '{0}'")]
    UnknownLibrary(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the tester infrastructure itself.
///
/// A candidate that fails its test is not an error; these cover the cases
/// where the test could not be run at all.
#[derive(Debug, Error)]
pub enum TesterError {
    #[error("Failed to start interpreter '{interpreter}': {reason}")]
    SpawnFailed { interpreter: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while checking candidate syntax.
///
/// A candidate that does not compile is not an error; these cover the cases
/// where the check itself could not be completed.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Failed to start interpreter '{interpreter}': {reason}")]
    SpawnFailed { interpreter: String, reason: String },

    #[error("Syntax check did not finish within {0}s")]
    TimedOut(u64),

    #[error("Unexpected syntax check output: {0}")]
    UnexpectedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ValidationError {
    /// Whether no candidate can be checked until the setup changes.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ValidationError::SpawnFailed { .. })
    }
}

/// Errors that can occur while rendering prompt templates.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Template rendering failed: {0}")]
    Render(#[from] tera::Error),
}

/// Errors that abort candidate generation.
///
/// Request rejections and exhausted transient retries never surface here;
/// the generator turns those into a placeholder candidate.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Syntax validator unavailable: {0}")]
    ValidatorUnavailable(String),
}

/// Errors that can occur while reading or writing run artifacts.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid problem identifier: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during document rendering, ingestion, or retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Embedding request failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Tokenizer unavailable: {0}")]
    Tokenizer(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while extracting Stack Overflow dumps.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Dump file not found: {0}")]
    MissingDump(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
