//! # parley middleware
//!
//! Chat client decorators. Each layer wraps an `Arc<dyn ChatClient>` and is
//! itself a `ChatClient`, so the agent manager can stack them in any order.
//!
//! | Layer | Client | Middleware |
//! |-------|--------|------------|
//! | Conversation memory | [`ConversationChatClient`] | [`ConversationMiddleware`] |
//! | Prompt caching | [`CachedChatClient`] | [`CachingMiddleware`] |
//! | Usage tracking | [`UsageTrackingChatClient`] | [`UsageTrackingMiddleware`] |
//! | Retry | [`RetryChatClient`] | [`RetryMiddleware`] |
//! | Logging | [`LoggingChatClient`] | [`LoggingMiddleware`] |

pub mod cache;
pub mod cached;
pub mod conversation;
pub mod logging;
pub mod retry;
pub mod usage;

pub use cache::{
    CacheBranch, DEFAULT_MIN_CACHE_WORDS, PassthroughCacheStrategy, ServerSideCacheStrategy,
};
pub use cached::{CachedChatClient, CachingMiddleware};
pub use conversation::{ConversationChatClient, ConversationMiddleware, new_conversation_id};
pub use logging::{LoggingChatClient, LoggingMiddleware};
pub use retry::{RetryChatClient, RetryMiddleware, RetryPolicy};
pub use usage::{UsageTrackingChatClient, UsageTrackingMiddleware};

/// Names under which the built-in middleware are registered.
pub mod names {
    pub const CONVERSATION: &str = "conversation";
    pub const CACHING: &str = "caching";
    pub const USAGE: &str = "usage";
    pub const RETRY: &str = "retry";
    pub const LOGGING: &str = "logging";
}
