//! Nearest-neighbour lookup over the regulation corpus.
//!
//! Two backends:
//! - **Pinecone** — hosted index queried over its data-plane REST API
//! - **pgvector** — `regulation_chunks` table in the application database

use std::time::Duration;

use async_trait::async_trait;
use pgvector::Vector;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

const PINECONE_API_VERSION: &str = "2024-07";

/// One ranked hit. `text` is the stored regulation snippet, if the record has one.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub text: Option<String>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `top_k` matches, most similar first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, IndexError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Index '{0}' has no data-plane host")]
    MissingHost(String),
}

// ============================================================================
// Pinecone
// ============================================================================

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub index_name: String,
    pub host: Option<String>,
    pub control_plane_url: String,
    pub namespace: String,
    pub timeout: Duration,
}

impl PineconeConfig {
    pub fn from_settings(api_key: String, settings: &crate::config::VectorIndexConfig) -> Self {
        Self {
            api_key,
            index_name: settings.index_name.clone(),
            host: settings.host.clone(),
            control_plane_url: settings.control_plane_url.clone(),
            namespace: settings.namespace.clone(),
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: Client,
    config: PineconeConfig,
    host: String,
}

impl PineconeIndex {
    /// Build the client, describing the index through the control plane when no
    /// host is configured.
    pub async fn connect(config: PineconeConfig) -> Result<Self, IndexError> {
        if config.api_key.is_empty() {
            return Err(IndexError::MissingApiKey);
        }
        let client = Client::builder().timeout(config.timeout).build()?;

        let host = match config.host.clone() {
            Some(host) => host,
            None => describe_host(&client, &config).await?,
        };
        tracing::info!(index = %config.index_name, host = %host, "Pinecone index resolved");

        Ok(Self {
            client,
            host: normalize_host(&host),
            config,
        })
    }

    /// Create a client against a known data-plane host
    pub fn with_host(config: PineconeConfig, host: String) -> Result<Self, IndexError> {
        if config.api_key.is_empty() {
            return Err(IndexError::MissingApiKey);
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            host: normalize_host(&host),
            config,
        })
    }
}

async fn describe_host(client: &Client, config: &PineconeConfig) -> Result<String, IndexError> {
    let url = format!(
        "{}/indexes/{}",
        config.control_plane_url.trim_end_matches('/'),
        config.index_name
    );
    let response = client
        .get(&url)
        .header("Api-Key", &config.api_key)
        .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(IndexError::Api {
            code: status.as_u16(),
            message,
        });
    }

    let body: DescribeIndexResponse = response.json().await?;
    body.host
        .filter(|h| !h.is_empty())
        .ok_or_else(|| IndexError::MissingHost(config.index_name.clone()))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, IndexError> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace: &self.config.namespace,
        };

        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), message = %message, "Pinecone query failed");
            return Err(IndexError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: QueryResponse = response.json().await?;
        Ok(body
            .matches
            .into_iter()
            .map(|m| IndexMatch {
                text: m
                    .metadata
                    .as_ref()
                    .and_then(|meta| meta.get("text"))
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
                id: m.id,
                score: m.score,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

// ============================================================================
// pgvector
// ============================================================================

/// Cosine search over `regulation_chunks(id, content, embedding)`.
#[derive(Debug, Clone)]
pub struct PgVectorIndex {
    pool: PgPool,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, IndexError> {
        let vector = Vector::from(vector.to_vec());

        // score = 1 - cosine distance
        let rows = sqlx::query_as::<_, (String, Option<String>, f64)>(
            r#"
            SELECT id::text, content, (1 - (embedding <=> $1))::float8 AS score
            FROM regulation_chunks
            WHERE embedding IS NOT NULL
            ORDER BY embedding <=> $1
            LIMIT $2
            "#,
        )
        .bind(&vector)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, content, score)| IndexMatch {
                id,
                score: score as f32,
                text: content,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "pgvector"
    }
}
