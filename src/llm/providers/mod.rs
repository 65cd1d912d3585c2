//! Chat provider implementations.

pub mod openrouter;

pub use openrouter::{OpenRouterProvider, DEFAULT_MAX_RETRIES};

pub use super::litellm::LlmProvider;
