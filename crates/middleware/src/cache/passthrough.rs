//! In-process prompt cache.
//!
//! Registered text stays in memory and cached-prompt references are expanded
//! back to plain text before a request leaves the pipeline. Works with any
//! provider; saves nothing on the wire but keeps call sites uniform.

use async_trait::async_trait;
use parley_core::cache::CacheStrategy;
use parley_core::error::CacheError;
use parley_core::message::{Content, Message};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

struct CachedText {
    text: String,
    expires_at: Instant,
}

/// Expands cached-prompt references into the registered text.
#[derive(Default)]
pub struct PassthroughCacheStrategy {
    entries: RwLock<HashMap<String, CachedText>>,
}

impl PassthroughCacheStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text registered under `cache_id`, if present and not expired.
    pub async fn resolve(&self, cache_id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(cache_id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.text.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStrategy for PassthroughCacheStrategy {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn create_cache(&self, text: &str, ttl: Duration) -> Result<String, CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }

        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(CacheError::InvalidTtl)?;

        let cache_id = format!("cache_{}", Uuid::new_v4().simple());
        self.entries.write().await.insert(
            cache_id.clone(),
            CachedText {
                text: text.to_string(),
                expires_at,
            },
        );
        debug!(cache_id = %cache_id, ttl_secs = ttl.as_secs(), "Cached prompt registered");
        Ok(cache_id)
    }

    async fn delete_cache(&self, cache_id: &str) -> Result<(), CacheError> {
        match self.entries.write().await.remove(cache_id) {
            Some(_) => Ok(()),
            None => Err(CacheError::NotFound(cache_id.to_string())),
        }
    }

    async fn transform_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>, CacheError> {
        if !messages.iter().any(Message::has_cached_prompt) {
            return Ok(messages);
        }

        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut out = Vec::with_capacity(messages.len());

        for message in messages {
            if !message.has_cached_prompt() {
                out.push(message);
                continue;
            }

            let mut contents = Vec::with_capacity(message.contents.len());
            for content in &message.contents {
                match content.as_cache_id() {
                    Some(cache_id) => {
                        let entry = entries
                            .get(cache_id)
                            .filter(|entry| entry.expires_at > now)
                            .ok_or_else(|| CacheError::NotFound(cache_id.to_string()))?;
                        contents.push(Content::text(entry.text.clone()));
                    }
                    None => contents.push(content.clone()),
                }
            }
            out.push(message.with_contents(contents));
        }

        Ok(out)
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired cached prompts");
        }
        removed
    }
}
