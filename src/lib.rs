//! self-debug: bounded LLM self-correction over DS-1000.
//!
//! A candidate solution is generated for each problem, executed against the
//! problem's test harness, and on failure regenerated with the failing code
//! and its error fed back to the model, up to a fixed correction budget.
//! Optional Stack Overflow retrieval backs a chain-of-thought strategy.

// Core modules
pub mod cli;
pub mod collectors;
pub mod correction;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod storage;
pub mod utils;
pub mod validation;

// Re-export commonly used error types
pub use error::{
    CollectorError, DatasetError, GenerationError, LlmError, RetrievalError, StorageError,
    TesterError, ValidationError,
};
