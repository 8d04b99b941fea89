//! Conversation memory — append-only, role-tagged message log keyed by session.
//!
//! History is windowed by age: `recent` returns every message of the session
//! newer than `now - window`, oldest first, with no count cap.
//!
//! Backends:
//! - `PgConversationStore` — `chat_memory` table, one transaction per turn
//! - `InMemoryConversationStore` — process-local, used when no database is configured

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regchat_core::{Message, RegchatConfig, RegchatError, Role};
use sqlx::PgPool;
use thiserror::Error;

/// Longest session id the `chat_memory.session_id` column accepts.
pub const MAX_SESSION_ID_LEN: usize = 100;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chat_memory (
    id          BIGSERIAL PRIMARY KEY,
    session_id  VARCHAR(100) NOT NULL,
    role        VARCHAR(20)  NOT NULL,
    content     TEXT         NOT NULL,
    created_at  TIMESTAMPTZ  NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS chat_memory_session_created_idx
    ON chat_memory (session_id, created_at);
CREATE INDEX IF NOT EXISTS chat_memory_created_idx
    ON chat_memory (created_at);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt message row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert `entries` for `session_id` as one atomic unit, all stamped now.
    async fn append_all(&self, session_id: &str, entries: &[(Role, &str)]) -> Result<(), StoreError>;

    async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<(), StoreError> {
        self.append_all(session_id, &[(role, content)]).await
    }

    /// Persist one completed exchange. Readers see both messages or neither.
    async fn append_turn(
        &self,
        session_id: &str,
        user_message: &str,
        assistant_reply: &str,
    ) -> Result<(), StoreError> {
        self.append_all(
            session_id,
            &[(Role::User, user_message), (Role::Assistant, assistant_reply)],
        )
        .await
    }

    /// Messages of `session_id` with timestamp >= now - `window`, oldest first.
    async fn recent(&self, session_id: &str, window: Duration) -> Result<Vec<Message>, StoreError>;

    /// Delete every message of `session_id`. Returns the number deleted.
    async fn clear(&self, session_id: &str) -> Result<u64, StoreError>;

    /// Delete messages strictly older than `older_than`, across all sessions.
    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Short description of the backing store, or why it is unreachable.
    async fn health(&self) -> Result<String, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Pick the store from config: Postgres when a database url is set, otherwise
/// process memory. Also returns the pool so other subsystems can share it.
pub async fn create_store_from_config(
    config: &RegchatConfig,
) -> Result<(Arc<dyn ConversationStore>, Option<PgPool>), RegchatError> {
    if config.database.url.is_empty() {
        tracing::warn!("No database url configured, conversation memory is process-local");
        return Ok((Arc::new(InMemoryConversationStore::new()), None));
    }

    let pool = regchat_core::db::connect(&config.database).await?;
    let store = PgConversationStore::new(pool.clone());
    store.ensure_schema().await.map_err(|e| match e {
        StoreError::Database(db) => RegchatError::Database(db),
        other => RegchatError::Other(other.to_string()),
    })?;
    Ok((Arc::new(store), Some(pool)))
}

// ============================================================================
// Postgres
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    session_id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<Role>().map_err(|e| StoreError::CorruptRow {
            id: row.id,
            reason: e.to_string(),
        })?;
        Ok(Message {
            session_id: row.session_id,
            role,
            content: row.content,
            timestamp: row.created_at,
        })
    }
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create `chat_memory` and its indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn append_all(&self, session_id: &str, entries: &[(Role, &str)]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (role, content) in entries {
            sqlx::query(
                r#"
                INSERT INTO chat_memory (session_id, role, content, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(session_id)
            .bind(role.as_str())
            .bind(*content)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(session_id = %session_id, count = entries.len(), "Stored chat messages");
        Ok(())
    }

    async fn recent(&self, session_id: &str, window: Duration) -> Result<Vec<Message>, StoreError> {
        let cutoff = Utc::now() - window;

        // id breaks ties between messages of the same turn
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM chat_memory
            WHERE session_id = $1 AND created_at >= $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn clear(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM chat_memory WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM chat_memory WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(regchat_core::db::server_version(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// In-process
// ============================================================================

/// Vec-backed store. Insertion order breaks timestamp ties.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing messages, e.g. a snapshot or fixture.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Mutex::new(messages),
        }
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Message>>, StoreError> {
        self.messages
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append_all(&self, session_id: &str, entries: &[(Role, &str)]) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut messages = self.lock()?;
        messages.extend(
            entries
                .iter()
                .map(|(role, content)| Message::new(session_id, *role, *content).at(now)),
        );
        Ok(())
    }

    async fn recent(&self, session_id: &str, window: Duration) -> Result<Vec<Message>, StoreError> {
        let cutoff = Utc::now() - window;
        let messages = self.lock()?;
        let mut selected: Vec<Message> = messages
            .iter()
            .filter(|m| m.session_id == session_id && m.timestamp >= cutoff)
            .cloned()
            .collect();
        // stable: same-timestamp messages keep insertion order
        selected.sort_by_key(|m| m.timestamp);
        Ok(selected)
    }

    async fn clear(&self, session_id: &str) -> Result<u64, StoreError> {
        let mut messages = self.lock()?;
        let before = messages.len();
        messages.retain(|m| m.session_id != session_id);
        Ok((before - messages.len()) as u64)
    }

    async fn sweep(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut messages = self.lock()?;
        let before = messages.len();
        messages.retain(|m| m.timestamp >= older_than);
        Ok((before - messages.len()) as u64)
    }

    async fn health(&self) -> Result<String, StoreError> {
        let count = self.lock()?.len();
        Ok(format!("in-memory ({} messages)", count))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// TESTS
// ============================================================================
