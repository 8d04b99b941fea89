//! Retrieval subsystem — regulation snippets relevant to a question
//!
//! - Embeds the question with the configured embedding backend
//! - Queries the vector index for `2 × top_k` candidates
//! - Keeps candidates with text of at most `max_words_per_match` words, in rank
//!   order, up to `top_k`
//!
//! `Retriever::retrieve` never fails: any upstream error becomes a single
//! placeholder string so the prompt always has a references block.

use std::sync::Arc;

use regchat_core::config::VectorBackend;
use regchat_core::embeddings::OpenAiEmbeddingConfig;
use regchat_core::vector_index::PineconeConfig;
use regchat_core::{
    EmbeddingBackend, EmbeddingError, IndexError, IndexMatch, OpenAiEmbeddingClient,
    PgVectorIndex, PineconeIndex, RegchatConfig, VectorIndex,
};
use sqlx::PgPool;
use thiserror::Error;

/// Prefix of the placeholder returned when retrieval fails.
pub const RETRIEVAL_ERROR_PREFIX: &str = "Error retrieving regulations: ";

/// Returned when the index answered but nothing survived filtering.
pub const NO_MATCHES_NOTE: &str = "No matching regulations were found for this question.";

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index query failed: {0}")]
    Index(#[from] IndexError),

    #[error("vector index is not configured: {0}")]
    NotConfigured(String),
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Ranked regulation snippets for `query`. Always returns at least one string.
    pub async fn retrieve(&self, query: &str, top_k: usize, max_words_per_match: usize) -> Vec<String> {
        match self.try_retrieve(query, top_k, max_words_per_match).await {
            Ok(references) if references.is_empty() => {
                tracing::warn!(top_k, max_words_per_match, "No regulation survived filtering");
                vec![NO_MATCHES_NOTE.to_string()]
            }
            Ok(references) => references,
            Err(e) => {
                tracing::error!(
                    embedder = self.embedder.name(),
                    index = self.index.name(),
                    error = %e,
                    "Regulation retrieval failed"
                );
                vec![format!("{}{}", RETRIEVAL_ERROR_PREFIX, e)]
            }
        }
    }

    /// Same as `retrieve` but surfaces errors and empty results.
    pub async fn try_retrieve(
        &self,
        query: &str,
        top_k: usize,
        max_words_per_match: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        let vector = self.embedder.embed(query).await?;
        let candidates = self.index.query(&vector, top_k.saturating_mul(2)).await?;

        tracing::debug!(
            candidates = candidates.len(),
            top_k,
            "Vector index returned candidates"
        );

        Ok(select_references(candidates, top_k, max_words_per_match))
    }
}

/// Walk `candidates` in rank order, skipping those without text or longer than
/// `max_words` words, until `top_k` are accepted.
pub fn select_references(
    candidates: impl IntoIterator<Item = IndexMatch>,
    top_k: usize,
    max_words: usize,
) -> Vec<String> {
    candidates
        .into_iter()
        .filter_map(|m| m.text)
        .filter(|text| word_count(text) <= max_words)
        .take(top_k)
        .collect()
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ============================================================================
// Construction from config
// ============================================================================

pub fn create_embedder_from_config(
    config: &RegchatConfig,
) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
    let api_key = config.secrets.openai_api_key.clone().unwrap_or_default();
    let client = OpenAiEmbeddingClient::with_base_url(
        OpenAiEmbeddingConfig::from_settings(api_key, &config.embedding),
        config.embedding.base_url.clone(),
    )?;
    Ok(Arc::new(client))
}

/// Build the configured index. `pool` is required for the pgvector backend.
pub async fn create_index_from_config(
    config: &RegchatConfig,
    pool: Option<PgPool>,
) -> Result<Arc<dyn VectorIndex>, RetrievalError> {
    match config.vector_index.backend {
        VectorBackend::Pinecone => {
            let api_key = config.secrets.pinecone_api_key.clone().unwrap_or_default();
            let index =
                PineconeIndex::connect(PineconeConfig::from_settings(api_key, &config.vector_index))
                    .await?;
            Ok(Arc::new(index))
        }
        VectorBackend::Pgvector => {
            let pool = pool.ok_or_else(|| {
                RetrievalError::NotConfigured("pgvector backend needs a database".to_string())
            })?;
            Ok(Arc::new(PgVectorIndex::new(pool)))
        }
    }
}
