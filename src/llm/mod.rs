//! LLM integration for self-debug.
//!
//! This module provides the chat completion clients used to generate
//! candidates and the embedding client used by retrieval.
//!
//! ```ignore
//! use self_debug::llm::{GenerationRequest, LlmProvider, Message, OpenRouterProvider};
//!
//! let provider = OpenRouterProvider::with_model(api_key, "openai/gpt-4o".to_string())
//!     .with_max_retries(10);
//! let request = GenerationRequest::new("", vec![Message::user("Say hi")])
//!     .with_temperature(0.0);
//! let response = provider.generate(request).await?;
//! ```

pub mod embeddings;
pub mod litellm;
pub mod providers;

pub use embeddings::{EmbeddingProvider, OpenAiEmbeddingClient};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message,
    RetryPolicy, Usage,
};
pub use providers::OpenRouterProvider;
