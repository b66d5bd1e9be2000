//! Prompt caching capabilities.
//!
//! A cache strategy registers large instruction blocks once and lets
//! messages carry a small `Content::CachedPrompt` reference instead of the
//! text. Right before a request leaves the pipeline the strategy rewrites
//! those references into whatever the provider understands.

use std::time::Duration;

use async_trait::async_trait;

use crate::chat::ChatOptions;
use crate::error::CacheError;
use crate::message::Message;

/// Registers, expands and retires cached prompt text.
#[async_trait]
pub trait CacheStrategy: Send + Sync {
    /// Strategy name, used in logs.
    fn name(&self) -> &str;

    /// Register `text` for `ttl` and return an opaque cache id.
    async fn create_cache(&self, text: &str, ttl: Duration) -> Result<String, CacheError>;

    /// Retire a cache id.
    async fn delete_cache(&self, cache_id: &str) -> Result<(), CacheError>;

    /// Expand or strip every cached-prompt reference in `messages`.
    async fn transform_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>, CacheError>;

    /// Side-channel hook: adjust request options for the references present
    /// in `messages` (called with the messages before transformation).
    async fn apply_to_options(&self, _messages: &[Message], options: ChatOptions) -> ChatOptions {
        options
    }

    /// Drop bookkeeping for ids that have expired. Returns how many went.
    async fn purge_expired(&self) -> usize {
        0
    }
}

/// Provider API for server-side cached content resources.
///
/// Supplied by the vendor client; the cache strategy only consumes it.
#[async_trait]
pub trait ServerCacheClient: Send + Sync {
    /// Create a cached content resource and return the provider's handle.
    async fn create_cached_content(&self, text: &str, ttl: Duration) -> Result<String, CacheError>;

    /// Delete a cached content resource by handle.
    async fn delete_cached_content(&self, handle: &str) -> Result<(), CacheError>;
}

/// Property key under which the provider-side cache handle travels in
/// `ChatOptions::additional_properties`.
pub const CACHED_CONTENT_PROPERTY: &str = "cached_content";
