//! Prompt-cache expansion as a pipeline layer.
//!
//! Rewrites cached-prompt references just before the request reaches the
//! base client, so every layer above works with the compact form.

use async_trait::async_trait;
use parley_core::cache::CacheStrategy;
use parley_core::chat::*;
use parley_core::error::ChatError;
use parley_core::message::Message;
use parley_core::middleware::ChatMiddleware;
use std::sync::Arc;
use tracing::debug;

/// Decorator applying a [`CacheStrategy`] to every request.
pub struct CachedChatClient {
    inner: Arc<dyn ChatClient>,
    strategy: Arc<dyn CacheStrategy>,
}

impl CachedChatClient {
    pub fn new(inner: Arc<dyn ChatClient>, strategy: Arc<dyn CacheStrategy>) -> Self {
        Self { inner, strategy }
    }

    async fn prepare(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<(Vec<Message>, ChatOptions), ChatError> {
        let options = self.strategy.apply_to_options(&messages, options).await;
        let references = messages.iter().filter(|m| m.has_cached_prompt()).count();
        let messages = self.strategy.transform_messages(messages).await?;
        if references > 0 {
            debug!(
                strategy = self.strategy.name(),
                references,
                "Cached prompt references rewritten"
            );
        }
        Ok((messages, options))
    }
}

#[async_trait]
impl ChatClient for CachedChatClient {
    fn name(&self) -> &str {
        "cached"
    }

    fn capabilities(&self) -> ClientCapabilities {
        self.inner.capabilities()
    }

    async fn respond(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        let (messages, options) = self.prepare(messages, options).await?;
        self.inner.respond(messages, options).await
    }

    async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        let (messages, options) = self.prepare(messages, options).await?;
        self.inner.respond_streaming(messages, options).await
    }
}

/// Middleware factory for [`CachedChatClient`].
pub struct CachingMiddleware {
    strategy: Arc<dyn CacheStrategy>,
}

impl CachingMiddleware {
    pub fn new(strategy: Arc<dyn CacheStrategy>) -> Self {
        Self { strategy }
    }
}

impl ChatMiddleware for CachingMiddleware {
    fn wrap(&self, inner: Arc<dyn ChatClient>, _agent_name: &str) -> Arc<dyn ChatClient> {
        Arc::new(CachedChatClient::new(inner, self.strategy.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PassthroughCacheStrategy;
    use parley_core::error::CacheError;
    use parley_core::testing::ScriptedChatClient;
    use std::time::Duration;

    #[tokio::test]
    async fn base_client_sees_expanded_text() {
        let strategy = Arc::new(PassthroughCacheStrategy::new());
        let id = strategy
            .create_cache("Long instructions", Duration::from_secs(60))
            .await
            .unwrap();
        let inner = Arc::new(ScriptedChatClient::new("base"));
        let client = CachedChatClient::new(inner.clone(), strategy);

        client
            .respond(
                vec![Message::cached_instructions(&id), Message::user("hi")],
                ChatOptions::new(),
            )
            .await
            .unwrap();

        let sent = inner.last_request().unwrap();
        assert_eq!(sent.messages[0].text(), "Long instructions");
        assert!(!sent.messages.iter().any(Message::has_cached_prompt));
    }

    #[tokio::test]
    async fn unknown_reference_fails_before_the_base_client() {
        let inner = Arc::new(ScriptedChatClient::new("base"));
        let client =
            CachedChatClient::new(inner.clone(), Arc::new(PassthroughCacheStrategy::new()));

        let err = client
            .respond(vec![Message::cached_instructions("cache_nope")], ChatOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Cache(CacheError::NotFound(_))));
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn streaming_is_rewritten_too() {
        let strategy = Arc::new(PassthroughCacheStrategy::new());
        let id = strategy.create_cache("ctx", Duration::from_secs(60)).await.unwrap();
        let inner = Arc::new(ScriptedChatClient::new("base"));
        let wrapped = CachingMiddleware::new(strategy).wrap(inner.clone(), "agent");

        let mut stream = wrapped
            .respond_streaming(vec![Message::cached_instructions(&id)], ChatOptions::new())
            .await
            .unwrap();
        while stream.recv().await.is_some() {}

        assert_eq!(inner.last_request().unwrap().messages[0].text(), "ctx");
    }

    #[test]
    fn capabilities_are_forwarded() {
        let inner = Arc::new(ScriptedChatClient::new("native").native());
        let client = CachedChatClient::new(inner, Arc::new(PassthroughCacheStrategy::new()));
        assert!(client.capabilities().native_conversation);
    }
}
