//! SQLite-backed vector store for rendered Stack Overflow threads.
//!
//! Documents are keyed by the SHA-256 of their content, so ingesting the
//! same text twice is a no-op. Embeddings are stored as little-endian `f32`
//! blobs and searched by brute-force cosine similarity.

use async_trait::async_trait;
use ndarray::Array1;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use super::{Document, Retriever};
use crate::error::RetrievalError;
use crate::llm::EmbeddingProvider;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id          TEXT    PRIMARY KEY,
    content     TEXT    NOT NULL,
    source      TEXT,
    dimensions  INTEGER NOT NULL,
    embedding   BLOB    NOT NULL,
    created_at  TEXT    NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Default number of documents embedded per request.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Content-derived document identifier.
pub fn document_id(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cosine similarity of two vectors. Zero vectors score 0.
pub fn cosine_similarity(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }
    a.dot(b) / (norm_a * norm_b)
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// A document waiting to be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDocument {
    /// Where the content came from (e.g. a rendered file name).
    pub source: Option<String>,
    pub content: String,
}

/// Counters reported by an ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub submitted: usize,
    pub duplicates: usize,
    pub already_stored: usize,
    pub ingested: usize,
}

/// Persistent document/embedding store.
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    /// Open (creating if needed) a store at `path`.
    pub async fn open(path: &str) -> Result<Self, RetrievalError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(path = path, "Vector store opened");
        Ok(Self { pool })
    }

    /// Number of stored documents.
    pub async fn count(&self) -> Result<usize, RetrievalError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    /// Subset of `ids` already present in the store.
    pub async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, RetrievalError> {
        let mut found = HashSet::new();
        for id in ids {
            let row = sqlx::query("SELECT 1 FROM documents WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if row.is_some() {
                found.insert(id.clone());
            }
        }
        Ok(found)
    }

    /// Insert a document with its embedding. Existing ids are left untouched.
    pub async fn insert(
        &self,
        content: &str,
        source: Option<&str>,
        embedding: &[f32],
    ) -> Result<String, RetrievalError> {
        let id = document_id(content);
        sqlx::query(
            "INSERT OR IGNORE INTO documents (id, content, source, dimensions, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(content)
        .bind(source)
        .bind(embedding.len() as i64)
        .bind(encode_embedding(embedding))
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Return up to `k` documents most similar to `query`, best first.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<Document>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, content, source, dimensions, embedding FROM documents")
            .fetch_all(&self.pool)
            .await?;

        let query = Array1::from(query.to_vec());
        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let dimensions = row.get::<i64, _>("dimensions") as usize;
            if dimensions != query.len() {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimensions,
                    actual: query.len(),
                });
            }
            let embedding = Array1::from(decode_embedding(&row.get::<Vec<u8>, _>("embedding")));
            scored.push(Document {
                id: row.get("id"),
                content: row.get("content"),
                source: row.get("source"),
                score: cosine_similarity(&query, &embedding),
            });
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    /// Embed and store documents in chunks.
    ///
    /// Within the batch, documents are deduplicated by content hash; ids that
    /// are already stored are skipped before any embedding request is made.
    pub async fn ingest(
        &self,
        documents: Vec<PendingDocument>,
        embedder: &dyn EmbeddingProvider,
        chunk_size: usize,
    ) -> Result<IngestStats, RetrievalError> {
        let mut stats = IngestStats {
            submitted: documents.len(),
            ..Default::default()
        };

        for chunk in documents.chunks(chunk_size.max(1)) {
            let mut seen = HashSet::new();
            let mut unique = Vec::new();
            for doc in chunk {
                let id = document_id(&doc.content);
                if seen.insert(id.clone()) {
                    unique.push((id, doc));
                } else {
                    stats.duplicates += 1;
                }
            }

            let ids: Vec<String> = unique.iter().map(|(id, _)| id.clone()).collect();
            let stored = self.existing_ids(&ids).await?;
            stats.already_stored += stored.len();
            unique.retain(|(id, _)| !stored.contains(id));

            if unique.is_empty() {
                tracing::info!("No new documents to ingest");
                continue;
            }

            let inputs: Vec<String> = unique.iter().map(|(_, d)| d.content.clone()).collect();
            let embeddings = embedder.embed(&inputs).await?;
            for ((_, doc), embedding) in unique.iter().zip(embeddings) {
                self.insert(&doc.content, doc.source.as_deref(), &embedding)
                    .await?;
            }
            stats.ingested += unique.len();
            tracing::info!(documents = unique.len(), "Ingested documents into the vector store");
        }

        Ok(stats)
    }
}

/// Retriever that embeds the query and searches a [`VectorStore`].
pub struct VectorRetriever {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorRetriever {
    pub fn new(store: VectorStore, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError> {
        let embedding = self.embedder.embed_one(query).await?;
        self.store.search(&embedding, k).await
    }
}
