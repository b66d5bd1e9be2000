//! Scripted collaborators shared by the test suites of downstream crates.
//!
//! Enabled with the `test-utils` feature.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::chat::{
    ChatClient, ChatOptions, ChatResponse, ChatResponseUpdate, ChatStream, ClientCapabilities,
    UsageDetails,
};
use crate::conversation::ConversationStore;
use crate::error::{ChatError, StoreError};
use crate::message::Message;
use crate::usage::{UsageRecord, UsageTracker};

/// A request as observed by a scripted client.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub options: ChatOptions,
}

/// A base client that records every request and answers from a script.
///
/// Queued errors are returned first, one per call. Otherwise the reply is
/// `"reply N"` (N = 1-based call number) with the configured usage.
pub struct ScriptedChatClient {
    name: String,
    native_conversation: bool,
    usage: Option<UsageDetails>,
    errors: Mutex<VecDeque<ChatError>>,
    stream_updates: Option<Vec<ChatResponseUpdate>>,
    stream_delay: Duration,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedChatClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_conversation: false,
            usage: None,
            errors: Mutex::new(VecDeque::new()),
            stream_updates: None,
            stream_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Advertise native conversation support.
    pub fn native(mut self) -> Self {
        self.native_conversation = true;
        self
    }

    pub fn with_usage(mut self, usage: UsageDetails) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Queue errors to be returned by the next calls, in order.
    pub fn with_errors(self, errors: Vec<ChatError>) -> Self {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).extend(errors);
        self
    }

    /// Stream these updates from `respond_streaming` instead of the default.
    pub fn with_stream(mut self, updates: Vec<ChatResponseUpdate>) -> Self {
        self.stream_updates = Some(updates);
        self
    }

    /// Pause between streamed updates.
    pub fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }

    fn record(&self, messages: &[Message], options: &ChatOptions) -> usize {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.push(RecordedRequest {
            messages: messages.to_vec(),
            options: options.clone(),
        });
        requests.len()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            native_conversation: self.native_conversation,
        }
    }

    async fn respond(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ChatError> {
        let call = self.record(&messages, &options);
        let scripted_error = self.errors.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        if let Some(err) = scripted_error {
            return Err(err);
        }
        let mut response = ChatResponse::new(Message::assistant(format!("reply {call}")));
        response.usage = self.usage.clone();
        if self.native_conversation {
            response.conversation_id = options.conversation_id.clone();
        }
        Ok(response)
    }

    async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        let Some(updates) = self.stream_updates.clone() else {
            let response = self.respond(messages, options).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx.send(Ok(ChatResponseUpdate::from_response(response))).await;
            return Ok(rx);
        };

        self.record(&messages, &options);
        let scripted_error = self.errors.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        if let Some(err) = scripted_error {
            return Err(err);
        }

        let delay = self.stream_delay;
        let (tx, rx) = tokio::sync::mpsc::channel(updates.len().max(1));
        tokio::spawn(async move {
            for update in updates {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(update)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// An in-memory store that counts loads and saves.
#[derive(Default)]
pub struct CountingStore {
    conversations: Mutex<HashMap<String, Vec<Message>>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for CountingStore {
    fn name(&self) -> &str {
        "counting"
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.history(conversation_id))
    }

    async fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation_id.to_string(), messages.to_vec());
        Ok(())
    }
}

/// A usage tracker that keeps every record it receives.
#[derive(Default)]
pub struct RecordingTracker {
    records: Mutex<Vec<UsageRecord>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl UsageTracker for RecordingTracker {
    async fn track(&self, record: UsageRecord) -> crate::Result<()> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
        Ok(())
    }
}
