pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod models;
pub mod vector_index;

/// Default base URL for the OpenAI-compatible embedding and completion APIs.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub use config::RegchatConfig;
pub use embeddings::{EmbeddingBackend, EmbeddingError, OpenAiEmbeddingClient};
pub use error::{ConfigError, RegchatError};
pub use generation::{ChatCompletion, GenerationError, OpenAiChatClient};
pub use models::{ChatMessage, Message, Role};
pub use vector_index::{IndexError, IndexMatch, PgVectorIndex, PineconeIndex, VectorIndex};
