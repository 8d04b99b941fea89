//! In-process doubles for the external services, shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regchat_core::{
    ChatCompletion, ChatMessage, EmbeddingBackend, EmbeddingError, GenerationError, IndexError,
    IndexMatch, Message, Role, VectorIndex,
};

use crate::subsystems::memory::{ConversationStore, StoreError};

pub struct FakeEmbedder {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for FakeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Api {
                code: 500,
                message: "embedding service down".to_string(),
            });
        }
        Ok(vec![0.1, 0.2, 0.3])
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub struct FakeIndex {
    matches: Vec<IndexMatch>,
    fail: bool,
    requested: Mutex<Vec<usize>>,
}

impl FakeIndex {
    pub fn with_texts(texts: &[&str]) -> Self {
        let matches = texts
            .iter()
            .enumerate()
            .map(|(i, text)| IndexMatch {
                id: format!("reg-{}", i),
                score: 1.0 - i as f32 * 0.01,
                text: Some(text.to_string()),
            })
            .collect();
        Self {
            matches,
            fail: false,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            matches: Vec::new(),
            fail: true,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested_top_k(&self) -> Vec<usize> {
        self.requested.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requested.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, IndexError> {
        self.requested.lock().unwrap().push(top_k);
        if self.fail {
            return Err(IndexError::Api {
                code: 503,
                message: "index unavailable".to_string(),
            });
        }
        Ok(self.matches.iter().take(top_k).cloned().collect())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub struct FakeGenerator {
    reply: Result<String, u16>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with an API error carrying `code`.
    pub fn failing(code: u16) -> Self {
        Self {
            reply: Err(code),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatCompletion for FakeGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, GenerationError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(code) => Err(GenerationError::Api {
                code: *code,
                message: "completion failed".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Store whose every operation fails, for degraded-path tests.
pub struct BrokenStore;

#[async_trait]
impl ConversationStore for BrokenStore {
    async fn append_all(&self, _session_id: &str, _entries: &[(Role, &str)]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn recent(&self, _session_id: &str, _window: Duration) -> Result<Vec<Message>, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn clear(&self, _session_id: &str) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn sweep(&self, _older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn health(&self) -> Result<String, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}
