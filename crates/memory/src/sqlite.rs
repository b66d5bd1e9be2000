//! SQLite conversation store.
//!
//! One table, one row per conversation:
//! - `conversations(id, messages, updated_at)` where `messages` is the JSON
//!   array of the full history.
//!
//! Saves are upserts, so the latest snapshot for an id always wins.

use async_trait::async_trait;
use chrono::Utc;
use parley_core::conversation::ConversationStore;
use parley_core::error::StoreError;
use parley_core::message::Message;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use tracing::{debug, info};

/// A durable conversation store backed by SQLite.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (or create) a database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database.
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY NOT NULL,
                messages    TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("conversations table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT messages FROM conversations WHERE id = ?1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(format!("load {conversation_id}: {e}")))?;

        match row {
            None => Ok(Vec::new()),
            Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Corrupted {
                conversation_id: conversation_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let json = serde_json::to_string(messages)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize history: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, messages, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                messages = excluded.messages,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("save {conversation_id}: {e}")))?;

        Ok(())
    }
}
