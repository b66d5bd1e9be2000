//! Request/response logging layer.

use async_trait::async_trait;
use parley_core::chat::*;
use parley_core::error::ChatError;
use parley_core::message::Message;
use parley_core::middleware::ChatMiddleware;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Logs every call with the agent name, message count and latency.
pub struct LoggingChatClient {
    inner: Arc<dyn ChatClient>,
    agent_name: String,
}

impl LoggingChatClient {
    pub fn new(inner: Arc<dyn ChatClient>, agent_name: impl Into<String>) -> Self {
        Self {
            inner,
            agent_name: agent_name.into(),
        }
    }
}

#[async_trait]
impl ChatClient for LoggingChatClient {
    fn name(&self) -> &str {
        "logging"
    }

    fn capabilities(&self) -> ClientCapabilities {
        self.inner.capabilities()
    }

    async fn respond(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        let started = Instant::now();
        let count = messages.len();
        debug!(agent = %self.agent_name, messages = count, conversation_id = ?options.conversation_id, "Chat request");

        let result = self.inner.respond(messages, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => debug!(
                agent = %self.agent_name,
                elapsed_ms,
                model = ?response.model,
                usage = ?response.usage,
                "Chat response"
            ),
            Err(e) => warn!(agent = %self.agent_name, elapsed_ms, error = %e, "Chat request failed"),
        }
        result
    }

    async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        let started = Instant::now();
        debug!(agent = %self.agent_name, messages = messages.len(), "Chat stream request");

        let result = self.inner.respond_streaming(messages, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(agent = %self.agent_name, elapsed_ms, "Chat stream opened"),
            Err(e) => warn!(agent = %self.agent_name, elapsed_ms, error = %e, "Chat stream failed to open"),
        }
        result
    }
}

/// Middleware factory for [`LoggingChatClient`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl ChatMiddleware for LoggingMiddleware {
    fn wrap(&self, inner: Arc<dyn ChatClient>, agent_name: &str) -> Arc<dyn ChatClient> {
        Arc::new(LoggingChatClient::new(inner, agent_name))
    }
}
