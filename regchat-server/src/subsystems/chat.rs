//! Chat orchestration — one question in, one grounded answer out.
//!
//! Per turn: validate, retrieve references, load the session's recent history,
//! assemble the prompt, generate, then persist the user message and reply as
//! one unit. A failed history read degrades to an empty history; a failed
//! generation persists nothing.

use std::sync::Arc;

use axum::http::StatusCode;
use regchat_core::generation::{ChatCompletionConfig, OpenAiChatClient};
use regchat_core::{ChatCompletion, GenerationError, RegchatConfig};
use thiserror::Error;

use super::memory::{ConversationStore, StoreError};
use super::prompt;
use super::retrieve::Retriever;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("Generation failed: {0}")]
    Upstream(#[from] GenerationError),

    #[error("Conversation store failed: {0}")]
    Storage(#[from] StoreError),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Upstream(_) | ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Tunables for one turn, lifted from `RegchatConfig`.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub top_k: usize,
    pub max_words_per_match: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub history_window: chrono::Duration,
}

impl From<&RegchatConfig> for ChatSettings {
    fn from(config: &RegchatConfig) -> Self {
        Self {
            top_k: config.vector_index.top_k,
            max_words_per_match: config.vector_index.max_words_per_match,
            max_tokens: config.generation.max_tokens,
            temperature: config.generation.temperature,
            history_window: config.memory.retention(),
        }
    }
}

pub struct ChatService {
    retriever: Retriever,
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn ChatCompletion>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        retriever: Retriever,
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn ChatCompletion>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            retriever,
            store,
            generator,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Answer `message` in the context of `session_id` and record the exchange.
    pub async fn handle_chat(&self, session_id: &str, message: &str) -> Result<String, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::Validation("Message cannot be empty".to_string()));
        }
        if session_id.trim().is_empty() {
            return Err(ChatError::Validation("Missing session ID".to_string()));
        }

        tracing::info!(session_id = %session_id, chars = message.chars().count(), "Chat message received");

        let references = self
            .retriever
            .retrieve(message, self.settings.top_k, self.settings.max_words_per_match)
            .await;

        let history = match self.store.recent(session_id, self.settings.history_window).await {
            Ok(history) => history,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    store = self.store.name(),
                    error = %e,
                    "Failed to load chat history, continuing without it"
                );
                Vec::new()
            }
        };

        let messages = prompt::assemble(&history, message, &references);
        tracing::debug!(
            session_id = %session_id,
            references = references.len(),
            history = history.len(),
            "Prompt assembled"
        );

        let reply = self
            .generator
            .generate(&messages, self.settings.max_tokens, self.settings.temperature)
            .await
            .map_err(|e| {
                tracing::error!(
                    session_id = %session_id,
                    generator = self.generator.name(),
                    timeout = e.is_timeout(),
                    error = %e,
                    "Chat completion failed"
                );
                e
            })?;

        self.store.append_turn(session_id, message, &reply).await?;
        tracing::info!(session_id = %session_id, chars = reply.chars().count(), "Chat reply sent");

        Ok(reply)
    }

    /// Forget everything stored for `session_id`.
    pub async fn clear(&self, session_id: &str) -> Result<u64, ChatError> {
        let deleted = self.store.clear(session_id).await?;
        tracing::info!(session_id = %session_id, deleted, "Chat memory cleared");
        Ok(deleted)
    }
}

pub fn create_generator_from_config(
    config: &RegchatConfig,
) -> Result<Arc<dyn ChatCompletion>, GenerationError> {
    let api_key = config.secrets.openai_api_key.clone().unwrap_or_default();
    let client = OpenAiChatClient::with_base_url(
        ChatCompletionConfig::from_settings(api_key, &config.generation),
        config.generation.base_url.clone(),
    )?;
    Ok(Arc::new(client))
}
