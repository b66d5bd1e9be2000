//! Provider-side prompt cache with an in-process fallback.
//!
//! Large texts are registered with the provider's cached-content API and
//! travel by handle in `ChatOptions::additional_properties`; small texts are
//! not worth a provider resource and go through the passthrough cache.

use async_trait::async_trait;
use parley_core::cache::{CACHED_CONTENT_PROPERTY, CacheStrategy, ServerCacheClient};
use parley_core::chat::ChatOptions;
use parley_core::error::CacheError;
use parley_core::message::{Content, Message};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::passthrough::PassthroughCacheStrategy;

/// Minimum word count for a text to be cached provider-side.
pub const DEFAULT_MIN_CACHE_WORDS: usize = 2048;

/// Where a cache id was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBranch {
    Passthrough,
    Provider,
}

/// Routes each text to the provider cache or the local fallback by size.
pub struct ServerSideCacheStrategy {
    client: Arc<dyn ServerCacheClient>,
    fallback: PassthroughCacheStrategy,
    min_words: usize,
    branches: RwLock<HashMap<String, CacheBranch>>,
}

impl ServerSideCacheStrategy {
    pub fn new(client: Arc<dyn ServerCacheClient>) -> Self {
        Self::with_min_words(client, DEFAULT_MIN_CACHE_WORDS)
    }

    pub fn with_min_words(client: Arc<dyn ServerCacheClient>, min_words: usize) -> Self {
        Self {
            client,
            fallback: PassthroughCacheStrategy::new(),
            min_words,
            branches: RwLock::new(HashMap::new()),
        }
    }

    pub fn min_words(&self) -> usize {
        self.min_words
    }

    /// Branch a live cache id was registered on.
    pub async fn branch_of(&self, cache_id: &str) -> Option<CacheBranch> {
        self.branches.read().await.get(cache_id).copied()
    }

    /// The in-process cache used for small texts.
    pub fn fallback(&self) -> &PassthroughCacheStrategy {
        &self.fallback
    }

    async fn provider_handles(&self, messages: &[Message]) -> Vec<String> {
        let branches = self.branches.read().await;
        let mut handles: Vec<String> = Vec::new();
        for cache_id in messages
            .iter()
            .flat_map(|m| m.contents.iter())
            .filter_map(Content::as_cache_id)
        {
            if branches.get(cache_id) == Some(&CacheBranch::Provider)
                && !handles.iter().any(|h| h == cache_id)
            {
                handles.push(cache_id.to_string());
            }
        }
        handles
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[async_trait]
impl CacheStrategy for ServerSideCacheStrategy {
    fn name(&self) -> &str {
        "server-side"
    }

    async fn create_cache(&self, text: &str, ttl: Duration) -> Result<String, CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }

        let words = word_count(text);
        if words < self.min_words {
            let cache_id = self.fallback.create_cache(text, ttl).await?;
            debug!(cache_id = %cache_id, words, "Text below provider threshold, cached locally");
            self.branches
                .write()
                .await
                .insert(cache_id.clone(), CacheBranch::Passthrough);
            return Ok(cache_id);
        }

        let handle = self.client.create_cached_content(text, ttl).await?;
        info!(handle = %handle, words, ttl_secs = ttl.as_secs(), "Provider cached content created");
        self.branches
            .write()
            .await
            .insert(handle.clone(), CacheBranch::Provider);
        Ok(handle)
    }

    async fn delete_cache(&self, cache_id: &str) -> Result<(), CacheError> {
        let branch = self.branches.read().await.get(cache_id).copied();
        match branch {
            Some(CacheBranch::Provider) => self.client.delete_cached_content(cache_id).await?,
            Some(CacheBranch::Passthrough) => {
                // An expired local id is already gone from the fallback.
                let deleted = self.fallback.delete_cache(cache_id).await;
                self.branches.write().await.remove(cache_id);
                return deleted;
            }
            None => return Err(CacheError::NotFound(cache_id.to_string())),
        }
        self.branches.write().await.remove(cache_id);
        Ok(())
    }

    /// Strip provider references (their handle travels in the options) and
    /// expand the rest locally.
    async fn transform_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>, CacheError> {
        let handles = self.provider_handles(&messages).await;
        if handles.is_empty() {
            return self.fallback.transform_messages(messages).await;
        }

        let mut stripped = Vec::with_capacity(messages.len());
        for message in messages {
            let had_provider_reference = message
                .contents
                .iter()
                .filter_map(Content::as_cache_id)
                .any(|id| handles.iter().any(|h| h == id));
            if !had_provider_reference {
                stripped.push(message);
                continue;
            }

            let contents: Vec<Content> = message
                .contents
                .iter()
                .filter(|c| match c.as_cache_id() {
                    Some(id) => !handles.iter().any(|h| h == id),
                    None => true,
                })
                .cloned()
                .collect();
            if !contents.is_empty() {
                stripped.push(message.with_contents(contents));
            }
        }

        self.fallback.transform_messages(stripped).await
    }

    async fn apply_to_options(&self, messages: &[Message], mut options: ChatOptions) -> ChatOptions {
        let handles = self.provider_handles(messages).await;
        let Some(first) = handles.first() else {
            return options;
        };
        if handles.len() > 1 {
            warn!(
                count = handles.len(),
                used = %first,
                "Multiple provider cache references in one request, only the first is attached"
            );
        }
        options
            .additional_properties
            .insert(CACHED_CONTENT_PROPERTY.to_string(), first.clone().into());
        options
    }

    /// Purge the local fallback and forget the local ids it no longer holds.
    /// Provider ids expire on the provider and stay until deleted.
    async fn purge_expired(&self) -> usize {
        let purged = self.fallback.purge_expired().await;

        let local: Vec<String> = self
            .branches
            .read()
            .await
            .iter()
            .filter(|(_, branch)| **branch == CacheBranch::Passthrough)
            .map(|(id, _)| id.clone())
            .collect();
        let mut stale = Vec::new();
        for cache_id in local {
            if self.fallback.resolve(&cache_id).await.is_none() {
                stale.push(cache_id);
            }
        }

        if !stale.is_empty() {
            let mut branches = self.branches.write().await;
            for cache_id in &stale {
                branches.remove(cache_id);
            }
            debug!(forgotten = stale.len(), "Dropped expired local cache ids");
        }
        purged
    }
}
