//! ChatClient trait: the abstraction every provider and middleware shares.
//!
//! A chat client knows how to send a list of messages to a model and get a
//! response back, either as a complete message or as a stream of updates.
//! Base clients talk to a provider; middleware clients wrap another client
//! and add behavior around the call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::message::{Content, Message, Role};

/// Stream of incremental updates produced by `respond_streaming`.
///
/// The producer side is a spawned task; dropping the receiver stops it.
pub type ChatStream = tokio::sync::mpsc::Receiver<Result<ChatResponseUpdate, ChatError>>;

/// Buffer size for streams created by middleware forwarding tasks.
pub const STREAM_BUFFER: usize = 32;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Per-call parameters.
///
/// Options never carry history: prior turns live in a conversation store or
/// in the caller's message list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Conversation to continue. Generated by the conversation layer when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Long-form instructions for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Model override for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Open bag of extra properties (call-scoped usage tags, provider side channels).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub additional_properties: serde_json::Map<String, serde_json::Value>,

    /// Cooperative cancellation for the whole call, streaming included.
    #[serde(skip)]
    pub cancellation: CancellationToken,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.additional_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Token usage information.
///
/// Counts are `None` when the client did not report them, never zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    /// Input tokens served from a provider-side prompt cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl UsageDetails {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            cached_input_tokens: None,
            total_tokens: Some(input_tokens + output_tokens),
        }
    }

    /// Whether at least one of input/output counts was reported.
    pub fn has_token_counts(&self) -> bool {
        self.input_tokens.is_some() || self.output_tokens.is_some()
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The produced message
    pub message: Message,

    /// Conversation the response belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Which model actually responded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageDetails>,
}

impl ChatResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            conversation_id: None,
            model: None,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: UsageDetails) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Fold a fully drained stream into one response.
    ///
    /// Adjacent text deltas are concatenated; the last reported conversation
    /// id, model and usage win.
    pub fn from_updates(updates: &[ChatResponseUpdate]) -> Self {
        let role = updates.iter().find_map(|u| u.role).unwrap_or(Role::Assistant);
        let mut contents: Vec<Content> = Vec::new();

        for content in updates.iter().flat_map(|u| u.contents.iter()) {
            match (contents.last_mut(), content) {
                (Some(Content::Text { text: acc }), Content::Text { text }) => acc.push_str(text),
                _ => contents.push(content.clone()),
            }
        }

        Self {
            message: Message::new(role, contents),
            conversation_id: updates.iter().rev().find_map(|u| u.conversation_id.clone()),
            model: updates.iter().rev().find_map(|u| u.model.clone()),
            usage: updates.iter().rev().find_map(|u| u.usage.clone()),
        }
    }
}

/// One incremental piece of a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponseUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Content delta
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Usage info (typically only in the final update)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageDetails>,

    /// Whether this is the final update
    #[serde(default)]
    pub done: bool,
}

impl ChatResponseUpdate {
    /// A text delta from the assistant.
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            role: Some(Role::Assistant),
            contents: vec![Content::text(delta)],
            ..Default::default()
        }
    }

    /// A whole response expressed as one final update.
    pub fn from_response(response: ChatResponse) -> Self {
        Self {
            role: Some(response.message.role),
            contents: response.message.contents,
            conversation_id: response.conversation_id,
            model: response.model,
            usage: response.usage,
            done: true,
        }
    }
}

/// What a client can do beyond plain request/response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// The client keeps multi-turn history itself (server-side or in a
    /// lower layer), so callers must not replay stored history to it.
    pub native_conversation: bool,
}

/// The core ChatClient trait.
///
/// Every provider client and every middleware decorator implements this
/// trait. Callers never know how many layers sit between them and the
/// provider.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "conversation").
    fn name(&self) -> &str;

    /// Capability query, consulted once per call by layers that branch on it.
    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities::default()
    }

    /// Send messages and get a complete response.
    async fn respond(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ChatError>;

    /// Send messages and get a stream of response updates.
    ///
    /// Default implementation calls `respond()` and wraps the result as a
    /// single final update.
    async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, ChatError> {
        let response = self.respond(messages, options).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(ChatResponseUpdate::from_response(response))).await;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_absent_is_not_zero() {
        let usage = UsageDetails::default();
        assert!(!usage.has_token_counts());

        let usage = UsageDetails {
            output_tokens: Some(3),
            ..Default::default()
        };
        assert!(usage.has_token_counts());
    }

    #[test]
    fn from_updates_concatenates_text() {
        let mut last = ChatResponseUpdate::text("!");
        last.usage = Some(UsageDetails::new(10, 3));
        last.conversation_id = Some("conv-1".into());
        last.done = true;

        let updates = vec![
            ChatResponseUpdate::text("Hel"),
            ChatResponseUpdate::text("lo"),
            ChatResponseUpdate {
                contents: vec![Content::FunctionCall {
                    call_id: "c1".into(),
                    name: "lookup".into(),
                    arguments: serde_json::json!({}),
                }],
                ..Default::default()
            },
            last,
        ];

        let response = ChatResponse::from_updates(&updates);
        assert_eq!(response.message.role, Role::Assistant);
        assert_eq!(response.message.contents.len(), 3);
        assert_eq!(response.message.contents[0], Content::text("Hello"));
        assert_eq!(response.message.contents[2], Content::text("!"));
        assert_eq!(response.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(response.usage, Some(UsageDetails::new(10, 3)));
    }

    #[test]
    fn options_skip_cancellation_when_serialized() {
        let options = ChatOptions::new()
            .with_conversation_id("abc")
            .with_property("tenant", "acme");
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["conversation_id"], "abc");
        assert_eq!(json["additional_properties"]["tenant"], "acme");
        assert!(json.get("cancellation").is_none());
    }

    struct EchoClient;

    #[async_trait]
    impl ChatClient for EchoClient {
        fn name(&self) -> &str {
            "echo"
        }

        async fn respond(
            &self,
            messages: Vec<Message>,
            _options: ChatOptions,
        ) -> Result<ChatResponse, ChatError> {
            let text = messages.last().map(|m| m.text()).unwrap_or_default();
            Ok(ChatResponse::new(Message::assistant(text)))
        }
    }

    #[tokio::test]
    async fn default_streaming_yields_single_final_update() {
        let mut rx = EchoClient
            .respond_streaming(vec![Message::user("ping")], ChatOptions::new())
            .await
            .unwrap();

        let update = rx.recv().await.unwrap().unwrap();
        assert!(update.done);
        assert_eq!(update.contents, vec![Content::text("ping")]);
        assert!(rx.recv().await.is_none());
        assert!(!EchoClient.capabilities().native_conversation);
    }
}
