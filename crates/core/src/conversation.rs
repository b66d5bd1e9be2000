//! ConversationStore trait: persisted per-conversation message history.
//!
//! A conversation record maps a conversation id to the full, uncompacted,
//! append-only list of messages exchanged so far. Records are created on
//! first save and never deleted by the chat pipeline; retention and expiry
//! are the backing store's business.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::Message;

/// Key/value persistence of conversation history.
///
/// Implementations: in-memory (for testing), JSON files, SQLite.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Load the ordered history for a conversation. Unknown ids yield an
    /// empty history, not an error.
    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Replace the stored history for a conversation.
    async fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError>;
}
