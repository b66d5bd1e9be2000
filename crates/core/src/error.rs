//! Error types for the parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Chat client errors ---
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Prompt cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Agent resolution errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Usage tracking errors ---
    #[error("Usage tracking failed: {0}")]
    Tracking(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors surfaced by a chat client or any middleware wrapping one.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Client not configured: {0}")]
    NotConfigured(String),

    #[error("Conversation store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Prompt cache failed: {0}")]
    Cache(#[from] CacheError),
}

impl ChatError {
    /// Whether a retry layer may attempt the call again.
    ///
    /// Only unavailability is transient; not-found, cache and store failures
    /// surface directly.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout(_) => true,
            Self::ApiError { status_code, .. } => *status_code == 429 || *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted history for conversation {conversation_id}: {reason}")]
    Corrupted {
        conversation_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The id was never created, was deleted, or has expired.
    #[error("Cached prompt not found or expired: {0}")]
    NotFound(String),

    #[error("Cache TTL must be greater than zero")]
    InvalidTtl,

    #[error("Provider cache request failed: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("No agent factory registered for kind '{kind}' (agent '{agent}')")]
    NoFactory { agent: String, kind: String },

    #[error("Agent factory failed for '{agent}': {reason}")]
    FactoryFailed { agent: String, reason: String },
}
