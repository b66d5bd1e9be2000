//! Message and content domain types.
//!
//! These are the value objects that flow through every middleware layer:
//! application → agent pipeline → base client → provider, and back.
//! A message is never edited in place once it is part of a request; layers
//! that need a different shape build a new message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (identity, rules)
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Function/tool results fed back to the model
    Tool,
}

/// One item of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text.
    Text { text: String },

    /// Placeholder for a block of instruction text registered with a cache
    /// strategy. Carries only the opaque cache id, never the text.
    CachedPrompt { cache_id: String },

    /// A file or URI reference.
    Uri {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },

    /// A function call requested by the model.
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },

    /// The result of a previously requested function call.
    FunctionResult {
        call_id: String,
        #[serde(default)]
        result: serde_json::Value,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn cached_prompt(cache_id: impl Into<String>) -> Self {
        Self::CachedPrompt {
            cache_id: cache_id.into(),
        }
    }

    /// The cache id if this is a cached-prompt reference.
    pub fn as_cache_id(&self) -> Option<&str> {
        match self {
            Self::CachedPrompt { cache_id } => Some(cache_id),
            _ => None,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered content items
    #[serde(default)]
    pub contents: Vec<Content>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (provider info, author name, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create a message with the given role and content items.
    pub fn new(role: Role, contents: Vec<Content>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            contents,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Content::text(text)])
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Content::text(text)])
    }

    /// Create a new assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Content::text(text)])
    }

    /// Create a tool message carrying a function result.
    pub fn tool_result(call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self::new(
            Role::Tool,
            vec![Content::FunctionResult {
                call_id: call_id.into(),
                result,
            }],
        )
    }

    /// Create a system message that references a cached prompt.
    pub fn cached_instructions(cache_id: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Content::cached_prompt(cache_id)])
    }

    /// A copy of this message with different content items.
    ///
    /// Identity (id, role, timestamp, metadata) is preserved.
    pub fn with_contents(&self, contents: Vec<Content>) -> Self {
        Self {
            id: self.id.clone(),
            role: self.role,
            contents,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        }
    }

    /// Concatenation of all text items.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|c| match c {
                Content::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Whether any content item is a cached-prompt reference.
    pub fn has_cached_prompt(&self) -> bool {
        self.contents.iter().any(|c| c.as_cache_id().is_some())
    }
}
