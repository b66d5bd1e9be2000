//! # parley core
//!
//! Domain types, capability traits, and error definitions for the parley
//! chat-client pipeline. Provider clients, middleware, stores and trackers
//! all implement the traits defined here; this crate has no opinion on how.
//!
//! ## Layering
//!
//! Requests flow strictly downward: agent manager → middleware layers →
//! base client → provider. Sibling middleware only communicate through the
//! message list and options each passes to the next layer.

pub mod agent;
pub mod cache;
pub mod chat;
pub mod conversation;
pub mod error;
pub mod message;
pub mod middleware;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentDefinition, AgentFactory, PipelineSource};
pub use cache::{CACHED_CONTENT_PROPERTY, CacheStrategy, ServerCacheClient};
pub use chat::{
    ChatClient, ChatOptions, ChatResponse, ChatResponseUpdate, ChatStream, ClientCapabilities,
    ToolDefinition, UsageDetails,
};
pub use conversation::ConversationStore;
pub use error::{AgentError, CacheError, ChatError, Error, Result, StoreError};
pub use message::{Content, Message, Role};
pub use middleware::ChatMiddleware;
pub use usage::{UsageRecord, UsageTracker, merge_tags};
