use std::fmt;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RegchatConfig {
    pub service: ServiceConfig,
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub vector_index: VectorIndexConfig,
    pub generation: GenerationConfig,
    pub memory: MemoryConfig,
    pub session: SessionConfig,
    /// Populated from the process environment only, never from the config file.
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Legacy `/upload` document preview endpoint.
    pub upload_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty means no database: conversation memory is kept in-process.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: crate::OPENAI_BASE_URL.to_string(),
            model: "text-embedding-ada-002".to_string(),
            dimensions: crate::embeddings::ADA_002_DIMENSIONS,
            timeout_seconds: 30,
            max_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Pinecone,
    Pgvector,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub backend: VectorBackend,
    pub index_name: String,
    /// Pinecone data-plane host. Resolved through the control plane when unset.
    pub host: Option<String>,
    pub control_plane_url: String,
    pub namespace: String,
    pub top_k: usize,
    pub max_words_per_match: usize,
    pub timeout_seconds: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Pinecone,
            index_name: "turkish-fintech-regulations".to_string(),
            host: None,
            control_plane_url: "https://api.pinecone.io".to_string(),
            namespace: String::new(),
            top_k: 80,
            max_words_per_match: 200,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Minimum spacing between two completion calls.
    pub min_interval_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: crate::OPENAI_BASE_URL.to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            min_interval_ms: 100,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// History window and expiry age, in minutes.
    pub retention_minutes: u64,
    pub sweep_interval_minutes: u64,
    pub sweep_enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention_minutes: 120,
            sweep_interval_minutes: 60,
            sweep_enabled: true,
        }
    }
}

impl MemoryConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retention_minutes as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_minutes * 60)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// Caller must send `session_id` in the request body.
    #[default]
    Explicit,
    /// Session id lives in a cookie, minted on first contact.
    Cookie,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub policy: SessionPolicy,
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: SessionPolicy::Explicit,
            cookie_name: "regchat_session".to_string(),
        }
    }
}

#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("pinecone_api_key", &redact(&self.pinecone_api_key))
            .finish()
    }
}

impl RegchatConfig {
    /// Load `path` (optional), then `REGCHAT__SECTION__KEY` overrides, then the
    /// well-known variables `DATABASE_URL`, `PORT`, `OPENAI_API_KEY` and
    /// `PINECONE_API_KEY`. Fails when a required secret is missing.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("REGCHAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let mut config: RegchatConfig = s.try_deserialize()?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = optional_trimmed_env("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(port) = optional_trimmed_env("PORT") {
            self.http.port = port.parse().map_err(|_| ConfigError::ParseInt {
                key: "PORT".to_string(),
                value: port.clone(),
            })?;
        }
        self.secrets.openai_api_key = optional_trimmed_env("OPENAI_API_KEY");
        self.secrets.pinecone_api_key = optional_trimmed_env("PINECONE_API_KEY");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secrets.openai_api_key.is_none() {
            return Err(ConfigError::MissingVar("OPENAI_API_KEY".to_string()));
        }
        match self.vector_index.backend {
            VectorBackend::Pinecone if self.secrets.pinecone_api_key.is_none() => {
                return Err(ConfigError::MissingVar("PINECONE_API_KEY".to_string()));
            }
            VectorBackend::Pgvector if self.database.url.is_empty() => {
                return Err(ConfigError::Invalid(
                    "vector_index.backend = \"pgvector\" requires a database url".to_string(),
                ));
            }
            _ => {}
        }
        if self.vector_index.top_k == 0 {
            return Err(ConfigError::Invalid(
                "vector_index.top_k must be at least 1".to_string(),
            ));
        }
        if self.memory.retention_minutes == 0 {
            return Err(ConfigError::Invalid(
                "memory.retention_minutes must be at least 1".to_string(),
            ));
        }
        if self.memory.sweep_enabled && self.memory.sweep_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "memory.sweep_interval_minutes must be at least 1".to_string(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "session.cookie_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn optional_trimmed_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
