//! Conversation stores and history compaction for parley.

pub mod compaction;
pub mod file_backend;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use compaction::{CompactionStrategy, SlidingWindowCompaction, compact};
pub use file_backend::FileConversationStore;
pub use in_memory::InMemoryConversationStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConversationStore;
