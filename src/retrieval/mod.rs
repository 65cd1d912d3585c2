//! Semantic retrieval over Stack Overflow threads.
//!
//! - [`render`] - Turns extracted threads into token-bounded documents
//! - [`store`] - SQLite vector store, ingestion, and the vector-backed retriever
//!
//! The generator only depends on the [`Retriever`] trait, so a run can be
//! configured without any retrieval backend at all.

pub mod render;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

pub use render::{
    load_rendered, render_thread, RenderConfig, RenderStats, ThreadRenderer, TokenCounter,
};
pub use store::{
    document_id, IngestStats, PendingDocument, VectorRetriever, VectorStore, DEFAULT_CHUNK_SIZE,
};

/// A retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// SHA-256 of the content.
    pub id: String,
    pub content: String,
    pub source: Option<String>,
    /// Similarity to the query; higher is better.
    pub score: f32,
}

/// Source of supporting documents for a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return at most `k` documents for `query`, best first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError>;
}
