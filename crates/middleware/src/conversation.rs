//! Conversation memory for clients that have none.
//!
//! `ConversationChatClient` gives a stateless base client multi-turn memory:
//! it loads the stored history for the conversation id, appends the caller's
//! new messages, compacts the result into the window actually sent, and on
//! success appends the new messages plus the reply to the *uncompacted*
//! history. Base clients that track conversations natively are passed
//! through untouched and the store is never consulted.

use async_trait::async_trait;
use parley_core::chat::*;
use parley_core::conversation::ConversationStore;
use parley_core::error::ChatError;
use parley_core::message::Message;
use parley_core::middleware::ChatMiddleware;
use parley_memory::CompactionStrategy;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Generate a fresh conversation id.
pub fn new_conversation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Decorator adding store-backed multi-turn memory to a base client.
pub struct ConversationChatClient {
    inner: Arc<dyn ChatClient>,
    store: Arc<dyn ConversationStore>,
    compaction: Arc<dyn CompactionStrategy>,
}

/// Everything the store-backed path prepares before calling downstream.
struct PreparedTurn {
    conversation_id: String,
    history: Vec<Message>,
    window: Vec<Message>,
    options: ChatOptions,
}

impl ConversationChatClient {
    pub fn new(
        inner: Arc<dyn ChatClient>,
        store: Arc<dyn ConversationStore>,
        compaction: Arc<dyn CompactionStrategy>,
    ) -> Self {
        Self {
            inner,
            store,
            compaction,
        }
    }

    /// Resolve the id, load history and build the compacted window.
    async fn prepare(
        &self,
        messages: &[Message],
        mut options: ChatOptions,
    ) -> Result<PreparedTurn, ChatError> {
        let conversation_id = options
            .conversation_id
            .take()
            .unwrap_or_else(new_conversation_id);

        if options.cancellation.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let history = tokio::select! {
            biased;
            _ = options.cancellation.cancelled() => return Err(ChatError::Cancelled),
            loaded = self.store.load(&conversation_id) => loaded?,
        };

        let candidate: Vec<Message> = history.iter().chain(messages.iter()).cloned().collect();
        let candidate_len = candidate.len();
        let window = self.compaction.compact(candidate);

        debug!(
            conversation_id = %conversation_id,
            stored = history.len(),
            new = messages.len(),
            sent = window.len(),
            dropped = candidate_len - window.len(),
            "Conversation window prepared"
        );

        Ok(PreparedTurn {
            conversation_id,
            history,
            window,
            options,
        })
    }
}

#[async_trait]
impl ChatClient for ConversationChatClient {
    fn name(&self) -> &str {
        "conversation"
    }

    /// History is handled here, so layers above must not replay it.
    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            native_conversation: true,
        }
    }

    async fn respond(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        if self.inner.capabilities().native_conversation {
            let supplied = options.conversation_id.clone();
            let mut response = self.inner.respond(messages, options).await?;
            if response.conversation_id.is_none() {
                response.conversation_id = supplied;
            }
            return Ok(response);
        }

        let PreparedTurn {
            conversation_id,
            mut history,
            window,
            options,
        } = self.prepare(&messages, options).await?;

        let cancellation = options.cancellation.clone();
        let mut response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ChatError::Cancelled),
            result = self.inner.respond(window, options) => result?,
        };

        history.extend(messages);
        history.push(response.message.clone());
        self.store.save(&conversation_id, &history).await?;

        response.conversation_id = Some(conversation_id);
        Ok(response)
    }

    async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        if self.inner.capabilities().native_conversation {
            return self.inner.respond_streaming(messages, options).await;
        }

        let PreparedTurn {
            conversation_id,
            history,
            window,
            options,
        } = self.prepare(&messages, options).await?;

        let cancellation = options.cancellation.clone();
        let upstream = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ChatError::Cancelled),
            result = self.inner.respond_streaming(window, options) => result?,
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let turn = StreamedTurn {
            store: self.store.clone(),
            conversation_id,
            history,
            new_messages: messages,
        };
        tokio::spawn(turn.forward(upstream, tx, cancellation));
        Ok(rx)
    }
}

/// State carried by the forwarding task of one streamed turn.
struct StreamedTurn {
    store: Arc<dyn ConversationStore>,
    conversation_id: String,
    history: Vec<Message>,
    new_messages: Vec<Message>,
}

impl StreamedTurn {
    /// Relay updates, stamp the id on the final one, then persist.
    ///
    /// One update is held back so the last one can be identified when the
    /// upstream closes. Errors, cancellation, or a dropped receiver end the
    /// task without touching the store.
    async fn forward(
        self,
        mut upstream: ChatStream,
        tx: mpsc::Sender<Result<ChatResponseUpdate, ChatError>>,
        cancellation: CancellationToken,
    ) {
        let mut collected: Vec<ChatResponseUpdate> = Vec::new();
        let mut pending: Option<ChatResponseUpdate> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    debug!(conversation_id = %self.conversation_id, "Stream cancelled, history left unchanged");
                    return;
                }
                next = upstream.recv() => next,
            };

            match next {
                Some(Ok(update)) => {
                    if let Some(previous) = pending.replace(update) {
                        collected.push(previous.clone());
                        if tx.send(Ok(previous)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    if let Some(previous) = pending.take() {
                        let _ = tx.send(Ok(previous)).await;
                    }
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => break,
            }
        }

        let mut last = pending.unwrap_or_else(|| ChatResponseUpdate {
            done: true,
            ..Default::default()
        });
        last.conversation_id = Some(self.conversation_id.clone());
        collected.push(last.clone());
        if tx.send(Ok(last)).await.is_err() {
            return;
        }

        let reply = ChatResponse::from_updates(&collected).message;
        let mut history = self.history;
        history.extend(self.new_messages);
        history.push(reply);

        if let Err(e) = self.store.save(&self.conversation_id, &history).await {
            warn!(conversation_id = %self.conversation_id, error = %e, "Failed to persist streamed turn");
            let _ = tx.send(Err(ChatError::Store(e))).await;
        }
    }
}

/// Middleware factory for [`ConversationChatClient`].
pub struct ConversationMiddleware {
    store: Arc<dyn ConversationStore>,
    compaction: Arc<dyn CompactionStrategy>,
}

impl ConversationMiddleware {
    pub fn new(store: Arc<dyn ConversationStore>, compaction: Arc<dyn CompactionStrategy>) -> Self {
        Self { store, compaction }
    }
}

impl ChatMiddleware for ConversationMiddleware {
    fn wrap(&self, inner: Arc<dyn ChatClient>, _agent_name: &str) -> Arc<dyn ChatClient> {
        Arc::new(ConversationChatClient::new(
            inner,
            self.store.clone(),
            self.compaction.clone(),
        ))
    }
}
