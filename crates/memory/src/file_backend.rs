//! File-based conversation store: one JSON document per conversation.
//!
//! Storage location: `~/.parley/conversations/<escaped-id>.json`
//!
//! Simple, portable and human-inspectable. Writes go to a uniquely named
//! temporary file that is renamed over the target, so a crash never leaves
//! half a history and concurrent saves end with one complete snapshot.

use async_trait::async_trait;
use parley_core::conversation::ConversationStore;
use parley_core::error::StoreError;
use parley_core::message::Message;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// A directory of JSON files, one per conversation id.
pub struct FileConversationStore {
    dir: PathBuf,
}

impl FileConversationStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default directory: `~/.parley/conversations`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".parley").join("conversations")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_id(conversation_id)))
    }
}

/// Map a conversation id to a filename-safe, collision-free stem.
///
/// ASCII alphanumerics and `-` pass through; every other byte becomes `_xx`.
fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let path = self.path_for(conversation_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
            conversation_id: conversation_id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Storage(format!("Failed to create conversation directory: {e}"))
        })?;

        let content = serde_json::to_string(messages)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize history: {e}")))?;

        let path = self.path_for(conversation_id);
        // Unique per write so overlapping saves never share a temporary file.
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace {}: {e}", path.display())))?;

        debug!(conversation_id, messages = messages.len(), "Conversation saved to file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_is_collision_free() {
        assert_eq!(escape_id("abc-123"), "abc-123");
        assert_ne!(escape_id("a/b"), escape_id("a_b"));
        assert!(!escape_id("../../etc/passwd").contains('/'));
    }

    #[tokio::test]
    async fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path());
        assert!(store.load("never-saved").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let history = vec![Message::user("hi"), Message::assistant("hello")];

        {
            let store = FileConversationStore::new(dir.path().join("nested"));
            store.save("conv/1", &history).await.unwrap();
        }

        let store = FileConversationStore::new(dir.path().join("nested"));
        let loaded = store.load("conv/1").await.unwrap();
        assert_eq!(loaded, history);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_to_one_id_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileConversationStore::new(dir.path()));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save("same", &[Message::user(format!("turn {i}"))])
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = store.load("same").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].text().starts_with("turn "));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                let name = entry.as_ref().unwrap().file_name();
                name.to_string_lossy().ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path());
        std::fs::write(dir.path().join("bad.json"), "not json").unwrap();

        let err = store.load("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }
}
